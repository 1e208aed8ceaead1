//! Core types and traits for the recipe recommendation graph.
//!
//! Graph model, mirror events, and the `GraphStore` / `Recommender` seams shared by every crate.

mod dto;
mod events;
mod traits;

pub use dto::*;
pub use events::*;
pub use traits::*;
