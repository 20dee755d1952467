//! Core bridge logic: the upstream engine client and the per-session
//! state machines.

pub mod engine;
pub mod session;
