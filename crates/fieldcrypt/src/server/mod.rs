//! Demo gateway: an axum HTTP server storing records through the boundary
//! adapters.
//!
//! # Responsibilities
//! - Define the Axum router with all routes and shared middleware.
//! - Install the HTTP interceptor on routed entity paths, innermost, beneath
//!   tracing, timeout and compression layers.
//! - Inject shared application state (`AppState`) into handlers.

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
