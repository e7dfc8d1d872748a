//! Axum router construction.

use std::time::Duration;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, state::AppState};
use crate::boundary::intercept;

/// Per-request timeout applied to all routes, interceptor work included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the application [`Router`] with all routes and middleware attached.
///
/// The field interceptor is the innermost layer: it sees request bodies after
/// decompression would apply and response bodies before compression does.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/:entity", get(handlers::list).post(handlers::create))
        .route("/api/:entity/:id", get(handlers::get))
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(state.interceptor.clone(), intercept))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .with_state(state)
}
