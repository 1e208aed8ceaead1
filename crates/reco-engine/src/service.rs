//! RecommendationService: recorder, learner, and both ranking strategies over one graph store.

use crate::learner::PreferenceLearner;
use crate::ranking::{rank_by_preference, rank_collaborative, DEFAULT_LIMIT};
use crate::recorder::InteractionRecorder;
use reco_types::*;
use std::sync::Arc;

/// Recommender that composes the interaction recorder, the preference learner and
/// the ranking functions over a shared graph store.
pub struct RecommendationService<G: ?Sized> {
    graph: Arc<G>,
    recorder: InteractionRecorder<G>,
    learner: PreferenceLearner<G>,
    /// Maximum number of items per recommendation list.
    pub limit: usize,
}

impl<G: GraphStore + ?Sized> RecommendationService<G> {
    pub fn new(graph: Arc<G>) -> Self {
        Self {
            recorder: InteractionRecorder::new(Arc::clone(&graph)),
            learner: PreferenceLearner::new(Arc::clone(&graph)),
            graph,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait::async_trait]
impl<G: GraphStore + ?Sized + 'static> Recommender for RecommendationService<G> {
    async fn record_interaction(
        &self,
        user_id: &str,
        item_id: &str,
        kind: InteractionKind,
    ) -> Result<InteractionOutcome, EngineError> {
        let created = self.recorder.record(user_id, item_id, kind).await?;
        // The edge write has committed; recalculation reads at least that state.
        let preferences = self.learner.recalculate(user_id).await?;
        Ok(InteractionOutcome {
            created,
            preferences,
        })
    }

    async fn recalculate_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<PreferenceVector>, EngineError> {
        self.learner.recalculate(user_id).await
    }

    async fn collaborative_recommendations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ItemSummary>, EngineError> {
        let peers = self.graph.peer_interactions(user_id).await?;
        let ranked = rank_collaborative(&peers, self.limit);
        tracing::debug!(
            user_id,
            peer_edges = peers.len(),
            results = ranked.len(),
            "collaborative ranking"
        );
        Ok(ranked)
    }

    async fn preference_recommendations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ItemSummary>, EngineError> {
        let candidates = self.graph.preference_candidates(user_id).await?;
        let ranked = rank_by_preference(&candidates, self.limit);
        tracing::debug!(
            user_id,
            candidates = candidates.items.len(),
            results = ranked.len(),
            "preference ranking"
        );
        Ok(ranked)
    }

    async fn graph_stats(&self) -> Result<GraphStats, EngineError> {
        Ok(self.graph.stats().await?)
    }
}
