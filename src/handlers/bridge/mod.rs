//! Client-facing session WebSocket: protocol types and the connection
//! handler that feeds the per-session event loop.

pub mod handler;
pub mod messages;

pub use handler::session_handler;
pub use messages::{ClientMessage, MessageRoute, RelayMessage};
