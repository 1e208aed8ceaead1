//! In-memory graph store: item/user nodes and interaction edges behind one lock.

use reco_types::{
    GraphStats, GraphStore, GraphStoreError, Interaction, InteractionEdge, InteractionKind,
    ItemNode, PeerInteraction, PreferenceCandidates, PreferenceFn, PreferenceVector, UserNode,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// (user_id, item_id, kind): at most one edge per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct EdgeKey {
    user_id: String,
    item_id: String,
    kind: InteractionKind,
}

type EdgeIndex = HashMap<String, Vec<EdgeKey>>;

#[derive(Default)]
struct GraphState {
    items: HashMap<String, ItemNode>,
    users: HashMap<String, UserNode>,
    edges: HashMap<EdgeKey, InteractionEdge>,
    /// user_id -> outgoing edge keys.
    out_index: EdgeIndex,
    /// item_id -> incoming edge keys.
    in_index: EdgeIndex,
}

impl GraphState {
    fn add_edge_to_index(index: &mut EdgeIndex, node_id: &str, key: &EdgeKey) {
        let list = index.entry(node_id.to_string()).or_default();
        if !list.contains(key) {
            list.push(key.clone());
        }
    }

    fn remove_edge_from_index(index: &mut EdgeIndex, node_id: &str, key: &EdgeKey) {
        if let Some(list) = index.get_mut(node_id) {
            list.retain(|k| k != key);
            if list.is_empty() {
                index.remove(node_id);
            }
        }
    }

    fn remove_edges(&mut self, keys: Vec<EdgeKey>) -> usize {
        let mut removed = 0usize;
        for key in keys {
            if self.edges.remove(&key).is_some() {
                Self::remove_edge_from_index(&mut self.out_index, &key.user_id, &key);
                Self::remove_edge_from_index(&mut self.in_index, &key.item_id, &key);
                removed += 1;
            }
        }
        removed
    }

    fn require_user(&self, user_id: &str) -> Result<&UserNode, GraphStoreError> {
        self.users
            .get(user_id)
            .ok_or_else(|| GraphStoreError::NotFound(format!("user {}", user_id)))
    }

    /// Outgoing edges of `user_id`, sorted by (item id, kind).
    fn user_edges(&self, user_id: &str) -> Vec<&InteractionEdge> {
        let mut keys: Vec<&EdgeKey> = self
            .out_index
            .get(user_id)
            .map(|keys| keys.iter().collect())
            .unwrap_or_default();
        keys.sort();
        keys.into_iter().filter_map(|k| self.edges.get(k)).collect()
    }

    fn touched_items(&self, user_id: &str) -> HashSet<&str> {
        self.out_index
            .get(user_id)
            .map(|keys| keys.iter().map(|k| k.item_id.as_str()).collect())
            .unwrap_or_default()
    }

    fn interactions_of(&self, user_id: &str) -> Vec<Interaction> {
        self.user_edges(user_id)
            .into_iter()
            .filter_map(|edge| {
                self.items.get(&edge.item_id).map(|item| Interaction {
                    kind: edge.kind,
                    weight: edge.weight,
                    item: item.clone(),
                })
            })
            .collect()
    }
}

/// In-memory implementation of GraphStore.
///
/// All state lives under a single `RwLock`, so each trait method observes and
/// mutates the graph atomically. Clones share the same graph.
#[derive(Clone)]
pub struct InMemoryGraphStore {
    state: Arc<RwLock<GraphState>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
        }
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_item(&self, item: &ItemNode) -> Result<(), GraphStoreError> {
        let mut state = self.state.write().await;
        state.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> Result<bool, GraphStoreError> {
        let mut state = self.state.write().await;
        if state.items.remove(item_id).is_none() {
            return Ok(false);
        }
        let keys = state.in_index.get(item_id).cloned().unwrap_or_default();
        let removed = state.remove_edges(keys);
        tracing::debug!(item_id, edges = removed, "item detached");
        Ok(true)
    }

    async fn upsert_user(&self, user_id: &str) -> Result<(), GraphStoreError> {
        let mut state = self.state.write().await;
        state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserNode {
                id: user_id.to_string(),
                preferences: None,
            });
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<bool, GraphStoreError> {
        let mut state = self.state.write().await;
        if state.users.remove(user_id).is_none() {
            return Ok(false);
        }
        let keys = state.out_index.get(user_id).cloned().unwrap_or_default();
        let removed = state.remove_edges(keys);
        tracing::debug!(user_id, edges = removed, "user detached");
        Ok(true)
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<ItemNode>, GraphStoreError> {
        let state = self.state.read().await;
        Ok(state.items.get(item_id).cloned())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserNode>, GraphStoreError> {
        let state = self.state.read().await;
        Ok(state.users.get(user_id).cloned())
    }

    async fn create_interaction(
        &self,
        user_id: &str,
        item_id: &str,
        kind: InteractionKind,
    ) -> Result<bool, GraphStoreError> {
        // Check and insert under the same write guard.
        let mut state = self.state.write().await;
        state.require_user(user_id)?;
        if !state.items.contains_key(item_id) {
            return Err(GraphStoreError::NotFound(format!("item {}", item_id)));
        }
        let key = EdgeKey {
            user_id: user_id.to_string(),
            item_id: item_id.to_string(),
            kind,
        };
        if state.edges.contains_key(&key) {
            return Ok(false);
        }
        let edge = InteractionEdge {
            user_id: key.user_id.clone(),
            item_id: key.item_id.clone(),
            kind,
            weight: kind.weight(),
        };
        state.edges.insert(key.clone(), edge);
        GraphState::add_edge_to_index(&mut state.out_index, user_id, &key);
        GraphState::add_edge_to_index(&mut state.in_index, item_id, &key);
        Ok(true)
    }

    async fn interactions_of(&self, user_id: &str) -> Result<Vec<Interaction>, GraphStoreError> {
        let state = self.state.read().await;
        state.require_user(user_id)?;
        Ok(state.interactions_of(user_id))
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        compute: PreferenceFn<'_>,
    ) -> Result<Option<PreferenceVector>, GraphStoreError> {
        let mut state = self.state.write().await;
        state.require_user(user_id)?;
        let interactions = state.interactions_of(user_id);
        let Some(prefs) = compute(&interactions) else {
            return Ok(None);
        };
        if let Some(user) = state.users.get_mut(user_id) {
            user.preferences = Some(prefs.clone());
        }
        Ok(Some(prefs))
    }

    async fn peer_interactions(
        &self,
        user_id: &str,
    ) -> Result<Vec<PeerInteraction>, GraphStoreError> {
        let state = self.state.read().await;
        state.require_user(user_id)?;
        let own = state.touched_items(user_id);

        let mut peers: BTreeSet<&str> = BTreeSet::new();
        for item_id in &own {
            if let Some(keys) = state.in_index.get(*item_id) {
                peers.extend(
                    keys.iter()
                        .map(|k| k.user_id.as_str())
                        .filter(|peer| *peer != user_id),
                );
            }
        }

        let mut result = Vec::new();
        for peer in peers {
            for edge in state.user_edges(peer) {
                if own.contains(edge.item_id.as_str()) {
                    continue;
                }
                let Some(item) = state.items.get(&edge.item_id) else {
                    continue;
                };
                result.push(PeerInteraction {
                    peer_id: peer.to_string(),
                    kind: edge.kind,
                    weight: edge.weight,
                    item: item.clone(),
                });
            }
        }
        result.sort_by(|a, b| {
            a.item
                .id
                .cmp(&b.item.id)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
                .then_with(|| a.kind.cmp(&b.kind))
        });
        Ok(result)
    }

    async fn preference_candidates(
        &self,
        user_id: &str,
    ) -> Result<PreferenceCandidates, GraphStoreError> {
        let state = self.state.read().await;
        let user = state.require_user(user_id)?;
        let own = state.touched_items(user_id);
        let mut items: Vec<ItemNode> = state
            .items
            .values()
            .filter(|item| !own.contains(item.id.as_str()))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(PreferenceCandidates {
            preferences: user.preferences.clone(),
            items,
        })
    }

    async fn stats(&self) -> Result<GraphStats, GraphStoreError> {
        let state = self.state.read().await;
        Ok(GraphStats {
            items: state.items.len(),
            users: state.users.len(),
            interactions: state.edges.len(),
        })
    }
}
