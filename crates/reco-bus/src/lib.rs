//! Event channel connecting the primary-store write path to background consumers.

mod channel;
mod trait_;

pub use channel::{EventChannel, Published, SubscriptionId};
pub use reco_types::{EventEnvelope, GraphEvent, Topic};
pub use trait_::{BusError, EventHandler, HandlerError};
