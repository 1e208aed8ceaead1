//! Recommendation API: HTTP routes and runtime configuration.

pub mod config;
pub mod server;
