//! Graph mirror events: entity lifecycle notifications from the primary store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Topic an event is routed on. One topic per notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    ItemCreated,
    ItemDeleted,
    UserCreated,
    UserDeleted,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::ItemCreated,
        Topic::ItemDeleted,
        Topic::UserCreated,
        Topic::UserDeleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::ItemCreated => "item:created",
            Topic::ItemDeleted => "item:deleted",
            Topic::UserCreated => "user:created",
            Topic::UserDeleted => "user:deleted",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notification. Fields are named; no positional text encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    ItemCreated {
        item_id: String,
        name: String,
        category: String,
        tags: Vec<String>,
    },
    ItemDeleted {
        item_id: String,
    },
    UserCreated {
        user_id: String,
    },
    UserDeleted {
        user_id: String,
    },
}

impl GraphEvent {
    pub fn topic(&self) -> Topic {
        match self {
            GraphEvent::ItemCreated { .. } => Topic::ItemCreated,
            GraphEvent::ItemDeleted { .. } => Topic::ItemDeleted,
            GraphEvent::UserCreated { .. } => Topic::UserCreated,
            GraphEvent::UserDeleted { .. } => Topic::UserDeleted,
        }
    }

    /// Id of the entity the event is about.
    pub fn entity_id(&self) -> &str {
        match self {
            GraphEvent::ItemCreated { item_id, .. } | GraphEvent::ItemDeleted { item_id } => {
                item_id
            }
            GraphEvent::UserCreated { user_id } | GraphEvent::UserDeleted { user_id } => user_id,
        }
    }
}

/// Event as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: GraphEvent,
}

impl EventEnvelope {
    pub fn new(event: GraphEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        }
    }

    pub fn topic(&self) -> Topic {
        self.event.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_containing_delimiters_survive_serialization() {
        let event = GraphEvent::ItemCreated {
            item_id: "r:1".to_string(),
            name: "Salt, Fat: Acid".to_string(),
            category: "mains".to_string(),
            tags: vec!["sweet,sour".to_string(), "a:b".to_string()],
        };
        let json = serde_json::to_string(&EventEnvelope::new(event.clone())).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event, event);
        assert_eq!(back.topic(), Topic::ItemCreated);
    }

    #[test]
    fn topic_follows_variant() {
        let deleted = GraphEvent::UserDeleted {
            user_id: "u1".to_string(),
        };
        assert_eq!(deleted.topic(), Topic::UserDeleted);
        assert_eq!(deleted.entity_id(), "u1");
        assert_eq!(Topic::ItemDeleted.as_str(), "item:deleted");
    }
}
