//! Route modules for the chunk relay server

pub mod health;
pub mod upload;

use axum::{
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_chunk_bytes = state.config().server.max_chunk_bytes;

    Router::new()
        .route("/health", get(health::health_check).fallback(route_not_found))
        .merge(upload::router(max_chunk_bytes))
        .fallback(route_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RouteNotFound {
    message: String,
    error: &'static str,
    status_code: u16,
}

/// Fallback for unknown routes and unsupported methods
pub(crate) async fn route_not_found(method: Method, uri: Uri) -> impl IntoResponse {
    tracing::debug!(method = %method, path = uri.path(), "Route not found");

    (
        StatusCode::NOT_FOUND,
        Json(RouteNotFound {
            message: format!("Route {}:{} not found", method, uri.path()),
            error: "Not Found",
            status_code: StatusCode::NOT_FOUND.as_u16(),
        }),
    )
}
