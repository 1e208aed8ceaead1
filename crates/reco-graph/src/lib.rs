//! Graph store implementations: in-memory (default) and SQLite (feature `sqlite`).

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryGraphStore;
pub use reco_types::{
    GraphStats, GraphStore, GraphStoreError, Interaction, InteractionEdge, InteractionKind,
    ItemNode, PeerInteraction, PreferenceCandidates, PreferenceVector, UserNode,
};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteGraphStore;
