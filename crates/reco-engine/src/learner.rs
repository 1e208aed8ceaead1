//! Preference learning: per-user tag affinities from weighted interaction edges.

use reco_types::{EngineError, GraphStore, Interaction, PreferenceVector};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Compute the preference vector for a set of interactions.
///
/// `coefficient(tag) = Σ weight of edges whose item carries tag / Σ weight of all edges`.
/// An item's weight counts toward every one of its tags, so coefficients are
/// relative affinities and may sum past 1. Tags come out in ascending order.
/// Returns `None` when the total weight is zero.
pub fn compute_preferences(interactions: &[Interaction]) -> Option<PreferenceVector> {
    let total: u64 = interactions.iter().map(|i| u64::from(i.weight)).sum();
    if total == 0 {
        return None;
    }

    let mut tag_weights: BTreeMap<&str, u64> = BTreeMap::new();
    for interaction in interactions {
        let tags: BTreeSet<&str> = interaction.item.tags.iter().map(String::as_str).collect();
        for tag in tags {
            *tag_weights.entry(tag).or_default() += u64::from(interaction.weight);
        }
    }

    let (tags, coefficients) = tag_weights
        .into_iter()
        .map(|(tag, weight)| (tag.to_string(), weight as f64 / total as f64))
        .unzip();
    Some(PreferenceVector { tags, coefficients })
}

/// Recomputes and stores a user's preference vector.
pub struct PreferenceLearner<G: ?Sized> {
    graph: Arc<G>,
}

impl<G: GraphStore + ?Sized> PreferenceLearner<G> {
    pub fn new(graph: Arc<G>) -> Self {
        Self { graph }
    }

    /// Replace the user's preferences with a fresh computation.
    ///
    /// With no interactions the stored preferences are left untouched and `Ok(None)` is returned.
    pub async fn recalculate(
        &self,
        user_id: &str,
    ) -> Result<Option<PreferenceVector>, EngineError> {
        let written = self
            .graph
            .update_preferences(user_id, &compute_preferences)
            .await?;
        match &written {
            Some(prefs) => tracing::debug!(user_id, tags = prefs.len(), "preferences recalculated"),
            None => tracing::debug!(user_id, "no interactions; preferences left untouched"),
        }
        Ok(written)
    }
}
