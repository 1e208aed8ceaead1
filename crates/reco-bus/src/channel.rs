//! In-process event channel: one queue + one worker per subscription.

use crate::{BusError, EventHandler};
use reco_types::{EventEnvelope, GraphEvent, Topic};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type SubscriptionId = Uuid;

struct Subscription {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

/// Result of a publish: the envelope id and how many subscribers received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    pub event_id: Uuid,
    pub topic: Topic,
    pub delivered: usize,
}

/// Topic-based publish/subscribe channel.
///
/// Construct once at startup and share via `Arc`. Delivery is at-most-once: no
/// persistence, no acknowledgment, no replay. A subscriber registered after a
/// publish never sees that message.
///
/// A subscription owns one queue. Messages on that queue reach the handler in
/// publish order, including across the topics it was registered for; separate
/// subscriptions run independently.
pub struct EventChannel {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<Subscription>>>>,
    workers: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl EventChannel {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            workers: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Register `handler` for `topic` and spawn its worker.
    pub async fn subscribe(
        &self,
        topic: Topic,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, BusError> {
        self.subscribe_topics(&[topic], handler).await
    }

    /// Register `handler` for several topics behind a single queue and worker.
    pub async fn subscribe_topics(
        &self,
        topics: &[Topic],
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel::<EventEnvelope>();
        {
            let mut guard = self.subscribers.write().await;
            for topic in topics {
                let sub = Subscription { id, tx: tx.clone() };
                let subs = guard.entry(*topic).or_default();
                if !subs.iter().any(|s| s.id == id) {
                    subs.push(sub);
                }
            }
        }
        let worker = tokio::spawn(run_worker(id, handler, rx, self.cancel.child_token()));
        self.workers.lock().await.insert(id, worker);
        tracing::debug!(subscription = %id, topics = ?topics, "subscribed");
        Ok(id)
    }

    /// Drop a subscription and wait for its worker to drain what is already
    /// queued and exit.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let mut removed = false;
        {
            let mut guard = self.subscribers.write().await;
            for subs in guard.values_mut() {
                let before = subs.len();
                subs.retain(|s| s.id != id);
                removed |= subs.len() != before;
            }
            guard.retain(|_, subs| !subs.is_empty());
        }
        if !removed {
            return Err(BusError::SubscriptionNotFound(id.to_string()));
        }
        let worker = self.workers.lock().await.remove(&id);
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(
                    subscription = %id,
                    error = %e,
                    "event worker terminated abnormally"
                );
            }
        }
        tracing::debug!(subscription = %id, "unsubscribed");
        Ok(())
    }

    /// Hand `event` to every live subscriber of its topic. Never waits on handlers.
    pub async fn publish(&self, event: GraphEvent) -> Result<Published, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let envelope = EventEnvelope::new(event);
        let topic = envelope.topic();
        let guard = self.subscribers.read().await;
        let delivered = guard
            .get(&topic)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.tx.send(envelope.clone()).is_ok())
                    .count()
            })
            .unwrap_or(0);
        tracing::debug!(
            topic = %topic,
            event_id = %envelope.event_id,
            delivered,
            "event published"
        );
        Ok(Published {
            event_id: envelope.event_id,
            topic,
            delivered,
        })
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        let guard = self.subscribers.read().await;
        guard.get(&topic).map(Vec::len).unwrap_or(0)
    }

    /// Number of live workers, one per subscription.
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Signal every worker to stop and wait for them. Queued messages not yet
    /// picked up are discarded.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.subscribers.write().await.clear();
        let workers: HashMap<SubscriptionId, JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().await);
        for (id, worker) in workers {
            if let Err(e) = worker.await {
                tracing::error!(
                    subscription = %id,
                    error = %e,
                    "event worker terminated abnormally"
                );
            }
        }
        tracing::info!("event channel shut down");
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    mut rx: mpsc::UnboundedReceiver<EventEnvelope>,
    cancel: CancellationToken,
) {
    tracing::debug!(subscription = %id, handler = handler.name(), "worker started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let topic = envelope.topic();
        let event_id = envelope.event_id;
        let h = Arc::clone(&handler);
        // Each invocation runs on its own task so a panic stays contained.
        let outcome = tokio::spawn(async move { h.handle(&envelope).await }).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                topic = %topic,
                event_id = %event_id,
                handler = handler.name(),
                error = %e,
                "handler failed; event dropped"
            ),
            Err(e) => tracing::error!(
                topic = %topic,
                event_id = %event_id,
                handler = handler.name(),
                error = %e,
                "handler panicked; event dropped"
            ),
        }
    }
    tracing::debug!(subscription = %id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HandlerError;
    use std::time::Duration;

    struct Forward {
        tx: mpsc::UnboundedSender<GraphEvent>,
    }

    #[async_trait::async_trait]
    impl EventHandler for Forward {
        async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
            let _ = self.tx.send(envelope.event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
            Err("graph store down".into())
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl EventHandler for Panicking {
        async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
            panic!("boom");
        }
    }

    struct Stalled;

    #[async_trait::async_trait]
    impl EventHandler for Stalled {
        async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn forward() -> (Arc<Forward>, mpsc::UnboundedReceiver<GraphEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Forward { tx }), rx)
    }

    fn user_created(id: &str) -> GraphEvent {
        GraphEvent::UserCreated {
            user_id: id.to_string(),
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<GraphEvent>) -> GraphEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn delivers_only_to_matching_topic() {
        let bus = EventChannel::new();
        let (users, mut users_rx) = forward();
        let (items, mut items_rx) = forward();
        bus.subscribe(Topic::UserCreated, users).await.unwrap();
        bus.subscribe(Topic::ItemDeleted, items).await.unwrap();

        let published = bus.publish(user_created("u1")).await.unwrap();
        assert_eq!(published.delivered, 1);
        assert_eq!(published.topic, Topic::UserCreated);
        assert_eq!(next(&mut users_rx).await, user_created("u1"));
        assert!(items_rx.try_recv().is_err());
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_messages() {
        let bus = EventChannel::new();
        let published = bus.publish(user_created("early")).await.unwrap();
        assert_eq!(published.delivered, 0);

        let (h, mut rx) = forward();
        bus.subscribe(Topic::UserCreated, h).await.unwrap();
        bus.publish(user_created("late")).await.unwrap();
        assert_eq!(next(&mut rx).await, user_created("late"));
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn failing_or_slow_handlers_do_not_block_others() {
        let bus = EventChannel::new();
        bus.subscribe(Topic::UserCreated, Arc::new(Failing)).await.unwrap();
        bus.subscribe(Topic::UserCreated, Arc::new(Panicking)).await.unwrap();
        bus.subscribe(Topic::UserCreated, Arc::new(Stalled)).await.unwrap();
        let (h, mut rx) = forward();
        bus.subscribe(Topic::UserCreated, h).await.unwrap();

        for id in ["u1", "u2", "u3"] {
            let published = bus.publish(user_created(id)).await.unwrap();
            assert_eq!(published.delivered, 4);
        }
        for id in ["u1", "u2", "u3"] {
            assert_eq!(next(&mut rx).await, user_created(id));
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventChannel::new();
        let (h, _rx) = forward();
        let id = bus.subscribe(Topic::ItemCreated, h).await.unwrap();
        assert_eq!(bus.subscriber_count(Topic::ItemCreated).await, 1);
        bus.unsubscribe(id).await.unwrap();
        assert_eq!(bus.subscriber_count(Topic::ItemCreated).await, 0);
        assert!(matches!(
            bus.unsubscribe(id).await,
            Err(BusError::SubscriptionNotFound(_))
        ));
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_joins_workers_and_closes() {
        let bus = EventChannel::new();
        let (h, mut rx) = forward();
        bus.subscribe(Topic::UserDeleted, h).await.unwrap();
        bus.shutdown().await;

        assert!(bus.is_closed());
        assert!(matches!(
            bus.publish(user_created("u1")).await,
            Err(BusError::Closed)
        ));
        let (h2, _rx2) = forward();
        assert!(matches!(
            bus.subscribe(Topic::UserCreated, h2).await,
            Err(BusError::Closed)
        ));
        // Worker is gone, so its handler (and sender) were dropped.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn multi_topic_subscription_keeps_publish_order() {
        let bus = EventChannel::new();
        let (h, mut rx) = forward();
        let id = bus
            .subscribe_topics(&[Topic::UserCreated, Topic::UserDeleted], h)
            .await
            .unwrap();
        assert_eq!(bus.subscriber_count(Topic::UserCreated).await, 1);
        assert_eq!(bus.subscriber_count(Topic::UserDeleted).await, 1);
        assert_eq!(bus.worker_count().await, 1);

        let deleted = |id: &str| GraphEvent::UserDeleted {
            user_id: id.to_string(),
        };
        for i in 0..50 {
            let user = format!("u{i}");
            bus.publish(user_created(&user)).await.unwrap();
            bus.publish(deleted(&user)).await.unwrap();
        }
        for i in 0..50 {
            let user = format!("u{i}");
            assert_eq!(next(&mut rx).await, user_created(&user));
            assert_eq!(next(&mut rx).await, deleted(&user));
        }

        bus.unsubscribe(id).await.unwrap();
        assert_eq!(bus.subscriber_count(Topic::UserDeleted).await, 0);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_worker() {
        let bus = EventChannel::new();
        for _ in 0..10 {
            let (h, _rx) = forward();
            let id = bus.subscribe(Topic::ItemCreated, h).await.unwrap();
            bus.unsubscribe(id).await.unwrap();
        }
        assert_eq!(bus.worker_count().await, 0);

        let (h, mut rx) = forward();
        let id = bus.subscribe(Topic::ItemCreated, h).await.unwrap();
        bus.publish(GraphEvent::ItemCreated {
            item_id: "r1".to_string(),
            name: "Pie".to_string(),
            category: "dessert".to_string(),
            tags: vec![],
        })
        .await
        .unwrap();
        // Queued messages drain before the worker exits.
        bus.unsubscribe(id).await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(GraphEvent::ItemCreated { .. })));
        assert!(rx.recv().await.is_none());
        bus.shutdown().await;
    }
}
