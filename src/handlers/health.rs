//! Health probe and metrics exposition.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::Result;
use crate::state::AppState;

/// GET /api/health, the unauthenticated liveness probe.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "api-gateway",
    }))
}

/// GET /metrics, the Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Result<String> {
    state.metrics.render()
}
