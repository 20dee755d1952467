//! Error types for the bridge server.

pub mod app_error;

pub use app_error::{AppError, AppResult};
