//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::api::server::AppState;

/// Liveness check, independent of egress state
pub async fn health_check() -> impl IntoResponse {
    let now = Utc::now();
    let time = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "stream-relay",
            "time": time
        })),
    )
}

/// Snapshot of the egress pool
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let pool = &state.pool;
    let paths = pool.snapshot();

    Json(json!({
        "status": "ok",
        "direct_mode": pool.is_direct_mode(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "healthy": pool.healthy_count(),
        "total": pool.paths().len(),
        "strategy_mode": state.config.fetch.strategy_mode.as_str(),
        "segment_mode": state.config.rewrite.segments.as_str(),
        "paths": paths
    }))
}
