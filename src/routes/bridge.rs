//! Session WebSocket route configuration
//!
//! # Endpoint
//!
//! `GET /v1/session` - WebSocket upgrade for a live bridge session
//!
//! # Protocol
//!
//! After the upgrade, the bridge connects to the upstream engine and sends
//! `session_ready`. Clients then send:
//! - Binary audio frames (PCM 16-bit, 24kHz, mono) or JSON `audio` messages
//! - `frame` messages with the latest camera frame
//! - `sensitivity`, `mode`, `user_message`, `perception` messages
//!
//! The bridge responds with:
//! - `transcript` for finalized speech in both directions
//! - Binary audio frames for synthesized output
//! - `mute_mic` / `unmute_mic` / `stop_audio` / `request_frame` control
//! - `error` on failures
//!
//! # Example
//!
//! ```json
//! // Server, once the engine handshake completes
//! {"type": "session_ready", "session_id": "..."}
//!
//! // Client asks about the scene
//! {"type": "user_message", "text": "what do you see"}
//!
//! // Server may request a fresh frame before answering
//! {"type": "request_frame"}
//! ```

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::bridge::session_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the session WebSocket router
pub fn create_bridge_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/session", get(session_handler))
        .layer(TraceLayer::new_for_http())
}
