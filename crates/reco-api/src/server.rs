//! Axum server and routes.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use reco_bus::{BusError, EventChannel, Published};
use reco_types::{
    BaseResponse, EngineError, GraphEvent, GraphStats, InteractionKind, InteractionRequest,
    InteractionResponse, ItemCreatedRequest, PublishReceipt, PublishResponse,
    RecommendationResponse, Recommender, UserCreatedRequest,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub recommender: Arc<dyn Recommender>,
    pub bus: Arc<EventChannel>,
    pub interaction_timeout: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/recommendation/collaborative", get(handle_collaborative))
        .route("/recommendation/preferences", get(handle_preferences))
        .route("/recommendation/interaction", post(handle_interaction))
        .route("/mirror/items", post(handle_item_created))
        .route("/mirror/items/:id", delete(handle_item_deleted))
        .route("/mirror/users", post(handle_user_created))
        .route("/mirror/users/:id", delete(handle_user_deleted))
        .route("/graph/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn engine_error<T>(e: EngineError) -> BaseResponse<T> {
    match e {
        EngineError::NotFound(msg) => BaseResponse::error(404, msg),
        EngineError::InvalidArgument(msg) => BaseResponse::error(400, msg),
        EngineError::Store(e) => BaseResponse::error(500, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

impl UserQuery {
    fn require(self) -> Result<String, RecommendationResponse> {
        match self.user_id {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(BaseResponse::error(400, "user_id is required")),
        }
    }
}

async fn handle_collaborative(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Json<RecommendationResponse> {
    let user_id = match q.require() {
        Ok(id) => id,
        Err(res) => return Json(res),
    };
    match state.recommender.collaborative_recommendations(&user_id).await {
        Ok(items) => Json(BaseResponse::ok(items)),
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "collaborative recommendation failed");
            Json(engine_error(e))
        }
    }
}

async fn handle_preferences(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Json<RecommendationResponse> {
    let user_id = match q.require() {
        Ok(id) => id,
        Err(res) => return Json(res),
    };
    match state.recommender.preference_recommendations(&user_id).await {
        Ok(items) => Json(BaseResponse::ok(items)),
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "preference recommendation failed");
            Json(engine_error(e))
        }
    }
}

async fn handle_interaction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InteractionRequest>,
) -> Json<InteractionResponse> {
    if req.user_id.trim().is_empty() || req.item_id.trim().is_empty() {
        return Json(BaseResponse::error(400, "user_id and item_id are required"));
    }
    let kind = match InteractionKind::try_from(req.interaction) {
        Ok(kind) => kind,
        Err(e) => return Json(engine_error(e.into())),
    };
    // The record + recalculate unit runs to completion on its own task; the
    // deadline only bounds how long this request waits for it.
    let recommender = Arc::clone(&state.recommender);
    let (user_id, item_id) = (req.user_id.clone(), req.item_id.clone());
    let unit = tokio::spawn(async move {
        recommender
            .record_interaction(&user_id, &item_id, kind)
            .await
    });
    match tokio::time::timeout(state.interaction_timeout, unit).await {
        Ok(Ok(Ok(outcome))) => Json(BaseResponse::ok(outcome)),
        Ok(Ok(Err(e))) => {
            tracing::warn!(
                user_id = %req.user_id,
                item_id = %req.item_id,
                kind = %kind,
                error = %e,
                "interaction rejected"
            );
            Json(engine_error(e))
        }
        Ok(Err(e)) => {
            tracing::error!(
                user_id = %req.user_id,
                item_id = %req.item_id,
                error = %e,
                "interaction task failed"
            );
            Json(BaseResponse::error(500, "interaction task failed"))
        }
        Err(_) => {
            tracing::warn!(
                user_id = %req.user_id,
                item_id = %req.item_id,
                timeout_ms = state.interaction_timeout.as_millis() as u64,
                "interaction still running past deadline"
            );
            Json(BaseResponse::error(504, "interaction timed out"))
        }
    }
}

async fn publish(state: &AppState, event: GraphEvent) -> Json<PublishResponse> {
    match state.bus.publish(event).await {
        Ok(Published {
            event_id,
            topic,
            delivered,
        }) => Json(PublishResponse {
            code: 202,
            message: "Accepted".to_string(),
            data: Some(PublishReceipt {
                event_id: event_id.to_string(),
                topic: topic.to_string(),
                delivered,
            }),
        }),
        Err(e) => {
            tracing::error!(error = %e, closed = matches!(e, BusError::Closed), "publish failed");
            Json(BaseResponse::error(500, e.to_string()))
        }
    }
}

async fn handle_item_created(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ItemCreatedRequest>,
) -> Json<PublishResponse> {
    if req.item_id.trim().is_empty() {
        return Json(BaseResponse::error(400, "item_id is required"));
    }
    let event = GraphEvent::ItemCreated {
        item_id: req.item_id,
        name: req.name,
        category: req.category,
        tags: req.tags,
    };
    publish(&state, event).await
}

async fn handle_item_deleted(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<String>,
) -> Json<PublishResponse> {
    publish(&state, GraphEvent::ItemDeleted { item_id }).await
}

async fn handle_user_created(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserCreatedRequest>,
) -> Json<PublishResponse> {
    if req.user_id.trim().is_empty() {
        return Json(BaseResponse::error(400, "user_id is required"));
    }
    publish(&state, GraphEvent::UserCreated { user_id: req.user_id }).await
}

async fn handle_user_deleted(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<PublishResponse> {
    publish(&state, GraphEvent::UserDeleted { user_id }).await
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Json<BaseResponse<GraphStats>> {
    match state.recommender.graph_stats().await {
        Ok(stats) => Json(BaseResponse::ok(stats)),
        Err(e) => Json(engine_error(e)),
    }
}

async fn handle_health() -> &'static str {
    "ok"
}
