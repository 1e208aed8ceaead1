//! Ranking strategies over graph reads. Pure functions; the store does the traversal.

use reco_types::{ItemNode, ItemSummary, PeerInteraction, PreferenceCandidates, PreferenceVector};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_LIMIT: usize = 5;

/// Rank items by the summed weight similar users put on them, best first.
///
/// Each peer edge counts once. Ties keep ascending item id order.
pub fn rank_collaborative(peers: &[PeerInteraction], limit: usize) -> Vec<ItemSummary> {
    let mut scores: BTreeMap<&str, (u64, &ItemNode)> = BTreeMap::new();
    for peer in peers {
        let entry = scores.entry(peer.item.id.as_str()).or_insert((0, &peer.item));
        entry.0 += u64::from(peer.weight);
    }
    let mut ranked: Vec<(u64, &ItemNode)> = scores.into_values().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, item)| item.summary())
        .collect()
}

/// Sum of the user's coefficients over the item's (distinct) tags.
pub fn preference_score(preferences: &PreferenceVector, item: &ItemNode) -> f64 {
    let tags: BTreeSet<&str> = item.tags.iter().map(String::as_str).collect();
    tags.into_iter()
        .filter_map(|tag| preferences.coefficient(tag))
        .sum()
}

/// Rank candidates by preference score, best first.
///
/// Items sharing no tag with the user's preferences are not candidates. No stored
/// preferences yields an empty list.
pub fn rank_by_preference(candidates: &PreferenceCandidates, limit: usize) -> Vec<ItemSummary> {
    let Some(preferences) = candidates.preferences.as_ref() else {
        return Vec::new();
    };
    if preferences.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(f64, &ItemNode)> = candidates
        .items
        .iter()
        .map(|item| (preference_score(preferences, item), item))
        .filter(|(score, _)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored
        .into_iter()
        .take(limit)
        .map(|(_, item)| item.summary())
        .collect()
}
