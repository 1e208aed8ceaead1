//! Traits for the graph store and the recommendation service.

use crate::{
    GraphStats, Interaction, InteractionKind, InteractionOutcome, InvalidInteraction, ItemNode,
    ItemSummary, PeerInteraction, PreferenceCandidates, PreferenceVector, UserNode,
};
use async_trait::async_trait;

/// Computes a user's preference vector from their interactions, inside the
/// store's transaction. `None` means "leave the stored value untouched".
pub type PreferenceFn<'a> =
    &'a (dyn Fn(&[Interaction]) -> Option<PreferenceVector> + Send + Sync);

/// Property-graph store holding item/user nodes and interaction edges.
///
/// Every method is one transaction: either all of its effects are visible or none are.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or update an item node. Re-applying the same item is a no-op.
    async fn upsert_item(&self, item: &ItemNode) -> Result<(), GraphStoreError>;

    /// Remove an item and every edge incident to it. Returns false if it was absent.
    async fn delete_item(&self, item_id: &str) -> Result<bool, GraphStoreError>;

    /// Insert a user node if missing. Existing preferences are kept.
    async fn upsert_user(&self, user_id: &str) -> Result<(), GraphStoreError>;

    /// Remove a user and every edge incident to it. Returns false if it was absent.
    async fn delete_user(&self, user_id: &str) -> Result<bool, GraphStoreError>;

    async fn get_item(&self, item_id: &str) -> Result<Option<ItemNode>, GraphStoreError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserNode>, GraphStoreError>;

    /// Create the `kind` edge between user and item unless one already exists.
    ///
    /// Returns true when an edge was created. Fails with `NotFound` if either node is absent.
    async fn create_interaction(
        &self,
        user_id: &str,
        item_id: &str,
        kind: InteractionKind,
    ) -> Result<bool, GraphStoreError>;

    /// All edges of the user joined with their items, ordered by item id.
    async fn interactions_of(&self, user_id: &str) -> Result<Vec<Interaction>, GraphStoreError>;

    /// Read the user's interactions, compute and store the preference vector in one transaction.
    ///
    /// Returns the stored vector, or `None` if `compute` declined to write.
    async fn update_preferences(
        &self,
        user_id: &str,
        compute: PreferenceFn<'_>,
    ) -> Result<Option<PreferenceVector>, GraphStoreError>;

    /// Edges of users who share at least one item with `user_id`, restricted to
    /// items `user_id` has not interacted with.
    async fn peer_interactions(
        &self,
        user_id: &str,
    ) -> Result<Vec<PeerInteraction>, GraphStoreError>;

    /// The user's stored preferences plus every item the user has not interacted with.
    async fn preference_candidates(
        &self,
        user_id: &str,
    ) -> Result<PreferenceCandidates, GraphStoreError>;

    async fn stats(&self) -> Result<GraphStats, GraphStoreError>;
}

/// Recommendation service: interaction recording plus both ranking strategies.
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Record the interaction, then recalculate the user's preferences before returning.
    async fn record_interaction(
        &self,
        user_id: &str,
        item_id: &str,
        kind: InteractionKind,
    ) -> Result<InteractionOutcome, EngineError>;

    async fn recalculate_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<PreferenceVector>, EngineError>;

    async fn collaborative_recommendations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ItemSummary>, EngineError>;

    async fn preference_recommendations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ItemSummary>, EngineError>;

    async fn graph_stats(&self) -> Result<GraphStats, EngineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GraphStoreError {
    #[error("not found: {0}")]
    NotFound(String),
    /// Transient failure (connection, lock, contention). Safe to retry.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
    #[error("graph store error: {0}")]
    Other(String),
}

impl GraphStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GraphStoreError::Unavailable(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("graph: {0}")]
    Store(GraphStoreError),
}

impl From<GraphStoreError> for EngineError {
    fn from(e: GraphStoreError) -> Self {
        match e {
            GraphStoreError::NotFound(msg) => EngineError::NotFound(msg),
            other => EngineError::Store(other),
        }
    }
}

impl From<InvalidInteraction> for EngineError {
    fn from(e: InvalidInteraction) -> Self {
        EngineError::InvalidArgument(e.to_string())
    }
}
