//! Graph model types and request/response DTOs for the recommendation API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Typed relation from a user to an item. Each kind carries a fixed weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionKind {
    Viewed,
    Liked,
    Saved,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 3] = [
        InteractionKind::Viewed,
        InteractionKind::Liked,
        InteractionKind::Saved,
    ];

    /// Edge weight for this kind.
    pub fn weight(self) -> u32 {
        match self {
            InteractionKind::Viewed => 1,
            InteractionKind::Liked => 5,
            InteractionKind::Saved => 10,
        }
    }

    /// Relation label stored on the edge.
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Viewed => "VIEWED",
            InteractionKind::Liked => "LIKED",
            InteractionKind::Saved => "SAVED",
        }
    }

    /// Decode the numeric wire code (0 = viewed, 1 = liked, 2 = saved).
    pub fn from_code(code: i64) -> Result<Self, InvalidInteraction> {
        match code {
            0 => Ok(InteractionKind::Viewed),
            1 => Ok(InteractionKind::Liked),
            2 => Ok(InteractionKind::Saved),
            other => Err(InvalidInteraction(other.to_string())),
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionKind {
    type Err = InvalidInteraction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VIEWED" => Ok(InteractionKind::Viewed),
            "LIKED" => Ok(InteractionKind::Liked),
            "SAVED" => Ok(InteractionKind::Saved),
            _ => Err(InvalidInteraction(s.to_string())),
        }
    }
}

/// Unknown interaction kind (bad code or label).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid interaction kind: {0}")]
pub struct InvalidInteraction(pub String);

/// Item (recipe) node as mirrored from the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemNode {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ItemNode {
    pub fn summary(&self) -> ItemSummary {
        ItemSummary {
            name: self.name.clone(),
            category: self.category.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Index-aligned tag affinities: `tags[i]` pairs with `coefficients[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceVector {
    pub tags: Vec<String>,
    pub coefficients: Vec<f64>,
}

impl PreferenceVector {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Coefficient for `tag`, if the user has an affinity for it.
    pub fn coefficient(&self, tag: &str) -> Option<f64> {
        self.tags
            .iter()
            .position(|t| t == tag)
            .and_then(|i| self.coefficients.get(i).copied())
    }
}

/// User node. `preferences` stays `None` until the first recalculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNode {
    pub id: String,
    #[serde(default)]
    pub preferences: Option<PreferenceVector>,
}

/// One interaction edge user -> item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEdge {
    pub user_id: String,
    pub item_id: String,
    pub kind: InteractionKind,
    pub weight: u32,
}

/// An edge of the queried user joined with its item.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub weight: u32,
    pub item: ItemNode,
}

/// An edge from a similar user onto an item the queried user has not touched.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInteraction {
    pub peer_id: String,
    pub kind: InteractionKind,
    pub weight: u32,
    pub item: ItemNode,
}

/// Everything the preference ranking needs, read in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceCandidates {
    pub preferences: Option<PreferenceVector>,
    /// Items the user has no edge to, ordered by id.
    pub items: Vec<ItemNode>,
}

/// Node and edge counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub items: usize,
    pub users: usize,
    pub interactions: usize,
}

/// Recommendation result as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub name: String,
    pub category: String,
    pub tags: Vec<String>,
}

/// Interaction kind on the wire: numeric code or label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InteractionCode {
    Code(i64),
    Label(String),
}

impl TryFrom<InteractionCode> for InteractionKind {
    type Error = InvalidInteraction;

    fn try_from(value: InteractionCode) -> Result<Self, Self::Error> {
        match value {
            InteractionCode::Code(c) => InteractionKind::from_code(c),
            InteractionCode::Label(s) => s.parse(),
        }
    }
}

/// Record-interaction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    pub user_id: String,
    #[serde(alias = "recipe_id")]
    pub item_id: String,
    pub interaction: InteractionCode,
}

/// Item-created notification request (primary store write path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemCreatedRequest {
    #[serde(alias = "id")]
    pub item_id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// User-created notification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreatedRequest {
    #[serde(alias = "id")]
    pub user_id: String,
}

/// Base response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResponse<T> {
    #[serde(default = "default_code")]
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<T>,
}

fn default_code() -> i32 {
    200
}

impl<T> BaseResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

pub type RecommendationResponse = BaseResponse<Vec<ItemSummary>>;

/// Outcome of a recorded interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionOutcome {
    /// False when an edge of this kind already existed.
    pub created: bool,
    /// Preference vector after recalculation, if it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<PreferenceVector>,
}

pub type InteractionResponse = BaseResponse<InteractionOutcome>;

/// Accepted notification: the event id and how many subscribers got it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub event_id: String,
    pub topic: String,
    pub delivered: usize,
}

pub type PublishResponse = BaseResponse<PublishReceipt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_weights_are_fixed() {
        assert_eq!(InteractionKind::Viewed.weight(), 1);
        assert_eq!(InteractionKind::Liked.weight(), 5);
        assert_eq!(InteractionKind::Saved.weight(), 10);
    }

    #[test]
    fn kind_decoding_rejects_unknown_values() {
        assert_eq!(InteractionKind::from_code(1), Ok(InteractionKind::Liked));
        assert!(InteractionKind::from_code(3).is_err());
        assert!(InteractionKind::from_code(-1).is_err());
        assert_eq!("saved".parse::<InteractionKind>(), Ok(InteractionKind::Saved));
        assert!("SHARED".parse::<InteractionKind>().is_err());
    }

    #[test]
    fn interaction_request_accepts_code_or_label() {
        let by_code: InteractionRequest = serde_json::from_value(serde_json::json!({
            "user_id": "u1", "recipe_id": "r1", "interaction": 2
        }))
        .unwrap();
        assert_eq!(by_code.item_id, "r1");
        assert_eq!(
            InteractionKind::try_from(by_code.interaction),
            Ok(InteractionKind::Saved)
        );

        let by_label: InteractionRequest = serde_json::from_value(serde_json::json!({
            "user_id": "u1", "item_id": "r1", "interaction": "VIEWED"
        }))
        .unwrap();
        assert_eq!(
            InteractionKind::try_from(by_label.interaction),
            Ok(InteractionKind::Viewed)
        );
    }

    #[test]
    fn preference_lookup_is_index_aligned() {
        let prefs = PreferenceVector {
            tags: vec!["dessert".into(), "sweet".into()],
            coefficients: vec![0.25, 1.0],
        };
        assert_eq!(prefs.coefficient("sweet"), Some(1.0));
        assert_eq!(prefs.coefficient("dessert"), Some(0.25));
        assert_eq!(prefs.coefficient("spicy"), None);
    }
}
