//! Shared application state.

use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::core::session::SessionStore;

/// State shared across handlers: the configuration, the session registry and
/// an HTTP client for the engine's REST surface.
///
/// The session registry is the only cross-session shared mutable structure;
/// everything session-scoped lives inside the session's own event loop.
#[derive(Clone)]
pub struct AppState {
    pub config: BridgeConfig,
    pub sessions: Arc<SessionStore>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: SessionStore::new(),
            http: reqwest::Client::new(),
        })
    }
}
