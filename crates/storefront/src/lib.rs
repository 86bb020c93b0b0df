//! Atelier Storefront library.
//!
//! The order builder, checkout, payment reconciliation, order status machine
//! and status notifications, exposed as a library so the binary, the CLI and
//! the integration tests share one implementation.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

use axum::{Router, middleware::from_fn};
use tower_http::trace::TraceLayer;
use tower_sessions::{SessionManagerLayer, SessionStore};

use crate::state::AppState;

/// Assemble the full application router.
///
/// Sentry layers are outermost so they see every request.
pub fn app<S>(state: AppState, sessions: SessionManagerLayer<S>, rate_limited: bool) -> Router
where
    S: SessionStore + Clone,
{
    routes::routes(rate_limited)
        .layer(sessions)
        .layer(from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}
