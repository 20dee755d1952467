//! REST API route configuration.

use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;

use crate::handlers::credentials::issue_credential;
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST API router
///
/// # Endpoints
///
/// `POST /v1/credential` - mint a short-lived direct-session credential for
/// the peer-to-peer transport.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/credential", post(issue_credential))
        .layer(TraceLayer::new_for_http())
}
