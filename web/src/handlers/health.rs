//! Health check and metrics endpoints.

use axum::{
    extract::State,
    http::{header, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::warn;

use crate::metrics;
use crate::types::HealthResponse;
use crate::AppState;

/// Health check handler. Pings the session store so load balancers see
/// backend trouble early.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = match state.store.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            warn!("Session store ping failed: {e}");
            "unreachable"
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store.to_string(),
        active_games: state.pool.len(),
    })
}

/// Prometheus metrics handler.
pub async fn metrics_handler() -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics::encode_metrics(),
    )
}
