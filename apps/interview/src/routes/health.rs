use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns a simple status object with service version and live session count.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let active_sessions = state
        .sessions
        .read()
        .await
        .values()
        .filter(|handle| handle.is_running())
        .count();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "interview-session",
        "active_sessions": active_sessions
    }))
}
