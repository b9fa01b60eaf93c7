use axum::{Json, Router, extract::State, routing::get};
use hmr_protocol::BuildHash;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::assets::serve_asset;
use crate::ws::ws_handler;

/// Path of the notification socket.
pub const SOCKET_PATH: &str = "/__hmr";

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub last_hash: Option<BuildHash>,
    pub clients: usize,
}

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        last_hash: state.broadcaster.last_hash(),
        clients: state.broadcaster.client_count(),
    })
}

pub fn hmr_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(SOCKET_PATH, get(ws_handler))
        .fallback(serve_asset)
}

/// Full application router with CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(hmr_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
