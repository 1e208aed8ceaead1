//! Interaction recording: user + item + kind -> one weighted edge.

use reco_types::{EngineError, GraphStore, InteractionKind};
use std::sync::Arc;

pub struct InteractionRecorder<G: ?Sized> {
    graph: Arc<G>,
}

impl<G: GraphStore + ?Sized> InteractionRecorder<G> {
    pub fn new(graph: Arc<G>) -> Self {
        Self { graph }
    }

    /// Create the `kind` edge from user to item if it does not exist yet.
    ///
    /// Returns whether a new edge was written. Duplicate suppression is done by the
    /// store inside its transaction, so concurrent identical calls create one edge.
    /// Missing nodes surface as `NotFound`; they are never created here.
    pub async fn record(
        &self,
        user_id: &str,
        item_id: &str,
        kind: InteractionKind,
    ) -> Result<bool, EngineError> {
        let created = self
            .graph
            .create_interaction(user_id, item_id, kind)
            .await?;
        if created {
            tracing::info!(
                user_id,
                item_id,
                kind = %kind,
                weight = kind.weight(),
                "interaction recorded"
            );
        } else {
            tracing::debug!(user_id, item_id, kind = %kind, "interaction already present");
        }
        Ok(created)
    }
}
