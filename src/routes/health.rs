//! Unauthenticated health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health` - liveness probe.
///
/// Returns status, uptime, version and live resource counts. No token
/// required.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let router = &state.router;
    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "surfaces": router.surfaces().count().await,
        "terminals": router.terminals().count().await,
        "subscriptions": router.telemetry().active_count().await,
    }))
}
