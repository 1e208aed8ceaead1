//! Handler trait and errors for the event channel.

use async_trait::async_trait;
use reco_types::EventEnvelope;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event channel closed")]
    Closed,
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),
}

/// Consumer of published events.
///
/// Contract: `handle` is called once per message on the subscribed topic, from the
/// subscription's own worker. A returned error is logged by the channel and the
/// message is dropped; there is no redelivery.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Name used in log fields.
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}
