//! Upstream conversational engine client.
//!
//! The engine speaks a WebSocket protocol of JSON events: a session
//! configuration handshake, streamed audio append events, message-create
//! events carrying text and/or image content, response lifecycle events and
//! speech-detection events. This module owns the outbound connection,
//! including reconnection with exponential backoff, heartbeat liveness and
//! audio buffering across drops.
//!
//! Incoming engine traffic is surfaced as an [`EngineEvent`] stream consumed
//! by the session event loop; there are no callbacks.

pub mod client;
pub mod config;
pub mod messages;

pub use client::{EngineClient, EngineEvent};
pub use config::{
    ConnectionState, ENGINE_AUDIO_FORMAT, ENGINE_SAMPLE_RATE, EngineConfig, HeartbeatConfig,
    ReconnectConfig,
};
pub use messages::{ClientEvent, ServerEvent};

use thiserror::Error;

/// Errors that can occur on the upstream engine link.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Connection to the engine failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Session handshake did not complete
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
