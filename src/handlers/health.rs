//! Health check handler.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::AppState;

/// `GET /` - liveness probe with the active session count.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "verso-bridge",
        "active_sessions": state.sessions.len(),
    }))
}
