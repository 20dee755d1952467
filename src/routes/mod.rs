//! Route configuration.

pub mod api;
pub mod bridge;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Assemble the full application router: health, session WebSocket and
/// credential issuance.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", axum::routing::get(crate::handlers::health::health_check))
        .merge(bridge::create_bridge_router())
        .merge(api::create_api_router())
        .with_state(state)
}
