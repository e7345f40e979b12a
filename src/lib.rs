//! notifyd: push notification fan-out for document-store triggers.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! in `tests/` drive them directly.

use std::sync::Arc;

pub mod api;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod fanout;
pub mod geocode;
pub mod metrics;
pub mod models;
pub mod push;
pub mod store;
pub mod triggers;

use triggers::Services;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub services: Arc<Services>,
    /// Shared secret expected in `X-Trigger-Key` on trigger routes.
    pub trigger_key: String,
    /// HS256 secret for callable bearer tokens.
    pub callable_secret: String,
}
