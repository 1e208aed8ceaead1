//! Graph mirror sync: applies entity lifecycle events to the graph store.

use async_trait::async_trait;
use reco_bus::{BusError, EventChannel, EventHandler, HandlerError, SubscriptionId};
use reco_types::{EventEnvelope, GraphEvent, GraphStore, GraphStoreError, ItemNode, Topic};
use std::sync::Arc;
use std::time::Duration;

/// Bounded retry for transient store failures. Zero attempts means log-and-drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for MirrorRetry {
    fn default() -> Self {
        Self {
            attempts: 0,
            backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    Upserted,
    Deleted,
    /// Delete of a node the mirror never had (or already removed).
    Absent,
}

/// Subscriber that keeps the graph store in step with the primary store.
///
/// Every application is idempotent: re-delivered creations update in place and
/// deletions of absent nodes succeed.
pub struct GraphMirror<G: ?Sized> {
    graph: Arc<G>,
    retry: MirrorRetry,
}

impl<G: GraphStore + ?Sized + 'static> GraphMirror<G> {
    pub fn new(graph: Arc<G>) -> Self {
        Self {
            graph,
            retry: MirrorRetry::default(),
        }
    }

    pub fn with_retry(mut self, retry: MirrorRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Subscribe this mirror to every lifecycle topic through one queue, so the
    /// events for an entity are applied in the order they were published.
    pub async fn register(
        self: Arc<Self>,
        bus: &EventChannel,
    ) -> Result<SubscriptionId, BusError> {
        let handler: Arc<dyn EventHandler> = self;
        bus.subscribe_topics(&Topic::ALL, handler).await
    }

    /// Apply one event, retrying transient failures up to the configured bound.
    pub async fn apply(&self, event: &GraphEvent) -> Result<MirrorOutcome, GraphStoreError> {
        let mut attempt = 0u32;
        loop {
            match self.apply_once(event).await {
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    attempt += 1;
                    tracing::warn!(
                        topic = %event.topic(),
                        entity_id = event.entity_id(),
                        attempt,
                        error = %e,
                        "transient graph failure; retrying"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                other => return other,
            }
        }
    }

    async fn apply_once(&self, event: &GraphEvent) -> Result<MirrorOutcome, GraphStoreError> {
        match event {
            GraphEvent::ItemCreated {
                item_id,
                name,
                category,
                tags,
            } => {
                let item = ItemNode {
                    id: item_id.clone(),
                    name: name.clone(),
                    category: category.clone(),
                    tags: tags.clone(),
                };
                self.graph.upsert_item(&item).await?;
                Ok(MirrorOutcome::Upserted)
            }
            GraphEvent::ItemDeleted { item_id } => {
                Ok(deleted(self.graph.delete_item(item_id).await?))
            }
            GraphEvent::UserCreated { user_id } => {
                self.graph.upsert_user(user_id).await?;
                Ok(MirrorOutcome::Upserted)
            }
            GraphEvent::UserDeleted { user_id } => {
                Ok(deleted(self.graph.delete_user(user_id).await?))
            }
        }
    }
}

fn deleted(existed: bool) -> MirrorOutcome {
    if existed {
        MirrorOutcome::Deleted
    } else {
        MirrorOutcome::Absent
    }
}

#[async_trait]
impl<G: GraphStore + ?Sized + 'static> EventHandler for GraphMirror<G> {
    fn name(&self) -> &str {
        "graph-mirror"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let outcome = self.apply(&envelope.event).await?;
        tracing::info!(
            topic = %envelope.topic(),
            event_id = %envelope.event_id,
            entity_id = envelope.event.entity_id(),
            outcome = ?outcome,
            "graph mirror applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reco_graph::InMemoryGraphStore;
    use reco_types::{
        GraphStats, Interaction, InteractionKind, PeerInteraction, PreferenceCandidates,
        PreferenceFn, PreferenceVector, UserNode,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    fn item_created(id: &str, tags: &[&str]) -> GraphEvent {
        GraphEvent::ItemCreated {
            item_id: id.to_string(),
            name: format!("Recipe {id}"),
            category: "dessert".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn redelivered_creations_are_idempotent() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let mirror = GraphMirror::new(Arc::clone(&graph));
        let event = item_created("r1", &["sweet"]);
        assert_eq!(mirror.apply(&event).await.unwrap(), MirrorOutcome::Upserted);
        assert_eq!(mirror.apply(&event).await.unwrap(), MirrorOutcome::Upserted);
        let user = GraphEvent::UserCreated {
            user_id: "u1".to_string(),
        };
        mirror.apply(&user).await.unwrap();
        mirror.apply(&user).await.unwrap();

        let stats = graph.stats().await.unwrap();
        assert_eq!((stats.items, stats.users), (1, 1));
    }

    #[tokio::test]
    async fn deletion_removes_node_and_edges() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let mirror = GraphMirror::new(Arc::clone(&graph));
        mirror.apply(&item_created("r1", &["sweet"])).await.unwrap();
        mirror
            .apply(&GraphEvent::UserCreated {
                user_id: "u1".to_string(),
            })
            .await
            .unwrap();
        graph
            .create_interaction("u1", "r1", InteractionKind::Saved)
            .await
            .unwrap();

        let delete = GraphEvent::ItemDeleted {
            item_id: "r1".to_string(),
        };
        assert_eq!(mirror.apply(&delete).await.unwrap(), MirrorOutcome::Deleted);
        assert_eq!(mirror.apply(&delete).await.unwrap(), MirrorOutcome::Absent);
        assert!(graph.get_item("r1").await.unwrap().is_none());
        assert_eq!(graph.stats().await.unwrap().interactions, 0);

        let gone = GraphEvent::UserDeleted {
            user_id: "never-created".to_string(),
        };
        assert_eq!(mirror.apply(&gone).await.unwrap(), MirrorOutcome::Absent);
    }

    #[tokio::test]
    async fn events_flow_through_the_channel() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let bus = EventChannel::new();
        let mirror = Arc::new(GraphMirror::new(Arc::clone(&graph)));
        mirror.register(&bus).await.unwrap();
        assert_eq!(bus.worker_count().await, 1);
        for topic in Topic::ALL {
            assert_eq!(bus.subscriber_count(topic).await, 1);
        }

        bus.publish(item_created("r1", &["a:b", "c,d"])).await.unwrap();
        bus.publish(GraphEvent::UserCreated {
            user_id: "u1".to_string(),
        })
        .await
        .unwrap();

        for _ in 0..100 {
            let stats = graph.stats().await.unwrap();
            if stats.items == 1 && stats.users == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let item = graph.get_item("r1").await.unwrap().unwrap();
        assert_eq!(item.tags, vec!["a:b".to_string(), "c,d".to_string()]);
        assert!(graph.get_user("u1").await.unwrap().is_some());
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn back_to_back_create_and_delete_leave_nothing_behind() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let bus = EventChannel::new();
        Arc::new(GraphMirror::new(Arc::clone(&graph)))
            .register(&bus)
            .await
            .unwrap();

        for i in 0..200 {
            let item_id = format!("r{i}");
            let user_id = format!("u{i}");
            bus.publish(item_created(&item_id, &["sweet"])).await.unwrap();
            bus.publish(GraphEvent::UserCreated {
                user_id: user_id.clone(),
            })
            .await
            .unwrap();
            bus.publish(GraphEvent::ItemDeleted { item_id }).await.unwrap();
            bus.publish(GraphEvent::UserDeleted { user_id }).await.unwrap();
        }
        // Everything queued before the marker is applied before it.
        bus.publish(GraphEvent::UserCreated {
            user_id: "marker".to_string(),
        })
        .await
        .unwrap();
        for _ in 0..200 {
            if graph.get_user("marker").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bus.shutdown().await;

        let stats = graph.stats().await.unwrap();
        assert_eq!(stats.items, 0, "deleted items left in the graph");
        assert_eq!(stats.users, 1, "only the marker user should remain");
    }

    /// Store whose first `failures` writes report a transient outage.
    struct Flaky {
        inner: InMemoryGraphStore,
        failures: AtomicU32,
    }

    impl Flaky {
        fn trip(&self) -> Result<(), GraphStoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(GraphStoreError::Unavailable("connection reset".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl GraphStore for Flaky {
        async fn upsert_item(&self, item: &ItemNode) -> Result<(), GraphStoreError> {
            self.trip()?;
            self.inner.upsert_item(item).await
        }
        async fn delete_item(&self, item_id: &str) -> Result<bool, GraphStoreError> {
            self.inner.delete_item(item_id).await
        }
        async fn upsert_user(&self, user_id: &str) -> Result<(), GraphStoreError> {
            self.inner.upsert_user(user_id).await
        }
        async fn delete_user(&self, user_id: &str) -> Result<bool, GraphStoreError> {
            self.inner.delete_user(user_id).await
        }
        async fn get_item(&self, item_id: &str) -> Result<Option<ItemNode>, GraphStoreError> {
            self.inner.get_item(item_id).await
        }
        async fn get_user(&self, user_id: &str) -> Result<Option<UserNode>, GraphStoreError> {
            self.inner.get_user(user_id).await
        }
        async fn create_interaction(
            &self,
            user_id: &str,
            item_id: &str,
            kind: InteractionKind,
        ) -> Result<bool, GraphStoreError> {
            self.inner.create_interaction(user_id, item_id, kind).await
        }
        async fn interactions_of(
            &self,
            user_id: &str,
        ) -> Result<Vec<Interaction>, GraphStoreError> {
            self.inner.interactions_of(user_id).await
        }
        async fn update_preferences(
            &self,
            user_id: &str,
            compute: PreferenceFn<'_>,
        ) -> Result<Option<PreferenceVector>, GraphStoreError> {
            self.inner.update_preferences(user_id, compute).await
        }
        async fn peer_interactions(
            &self,
            user_id: &str,
        ) -> Result<Vec<PeerInteraction>, GraphStoreError> {
            self.inner.peer_interactions(user_id).await
        }
        async fn preference_candidates(
            &self,
            user_id: &str,
        ) -> Result<PreferenceCandidates, GraphStoreError> {
            self.inner.preference_candidates(user_id).await
        }
        async fn stats(&self) -> Result<GraphStats, GraphStoreError> {
            self.inner.stats().await
        }
    }

    fn flaky(failures: u32) -> Arc<Flaky> {
        Arc::new(Flaky {
            inner: InMemoryGraphStore::new(),
            failures: AtomicU32::new(failures),
        })
    }

    #[tokio::test]
    async fn transient_failure_is_dropped_without_retry() {
        let graph = flaky(1);
        let mirror = GraphMirror::new(Arc::clone(&graph));
        let err = mirror.apply(&item_created("r1", &[])).await.unwrap_err();
        assert!(err.is_transient());
        assert!(graph.get_item("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bounded_retry_recovers_from_transient_failure() {
        let graph = flaky(2);
        let mirror = GraphMirror::new(Arc::clone(&graph)).with_retry(MirrorRetry {
            attempts: 2,
            backoff: Duration::from_millis(1),
        });
        mirror.apply(&item_created("r1", &[])).await.unwrap();
        assert!(graph.get_item("r1").await.unwrap().is_some());

        let graph = flaky(3);
        let mirror = GraphMirror::new(Arc::clone(&graph)).with_retry(MirrorRetry {
            attempts: 2,
            backoff: Duration::from_millis(1),
        });
        assert!(mirror.apply(&item_created("r1", &[])).await.is_err());
    }
}
