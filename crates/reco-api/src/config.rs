use reco_engine::{MirrorRetry, DEFAULT_LIMIT};
use serde::Deserialize;
use std::time::Duration;

/// Which graph store backs the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    Memory,
    Sqlite,
}

/// Runtime configuration, read from `RECO_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Socket address the HTTP server binds.
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_backend")]
    pub graph_backend: GraphBackend,

    /// Database file for the sqlite backend.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Upper bound on one record-interaction call (edge write plus recalculation).
    #[serde(default = "default_interaction_timeout_ms")]
    pub interaction_timeout_ms: u64,

    #[serde(default = "default_recommendation_limit")]
    pub recommendation_limit: usize,

    /// Extra attempts the mirror makes on transient store failures.
    #[serde(default)]
    pub mirror_retry_attempts: u32,

    #[serde(default = "default_mirror_retry_backoff_ms")]
    pub mirror_retry_backoff_ms: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_backend() -> GraphBackend {
    GraphBackend::Memory
}

fn default_sqlite_path() -> String {
    "reco-graph.db".to_string()
}

fn default_interaction_timeout_ms() -> u64 {
    5000
}

fn default_recommendation_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_mirror_retry_backoff_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            graph_backend: default_backend(),
            sqlite_path: default_sqlite_path(),
            interaction_timeout_ms: default_interaction_timeout_ms(),
            recommendation_limit: default_recommendation_limit(),
            mirror_retry_attempts: 0,
            mirror_retry_backoff_ms: default_mirror_retry_backoff_ms(),
        }
    }
}

impl Config {
    /// Load from the process environment (and a `.env` file, if present).
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("RECO_").from_env::<Config>()
    }

    pub fn interaction_timeout(&self) -> Duration {
        Duration::from_millis(self.interaction_timeout_ms)
    }

    pub fn mirror_retry(&self) -> MirrorRetry {
        MirrorRetry {
            attempts: self.mirror_retry_attempts,
            backoff: Duration::from_millis(self.mirror_retry_backoff_ms),
        }
    }
}
