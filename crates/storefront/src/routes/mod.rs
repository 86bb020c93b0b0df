//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                              - Liveness
//! GET    /health/ready                        - Database readiness
//!
//! # Roster (session-scoped)
//! GET    /api/roster                          - Current roster
//! PUT    /api/roster                          - Replace all people, cursor to 0
//! DELETE /api/roster                          - Start over
//! PATCH  /api/roster/people/{person_id}       - Partial update of one person
//! POST   /api/roster/advance                  - Cursor forward (clamped)
//! POST   /api/roster/retreat                  - Cursor back (clamped)
//!
//! # Checkout and payment (rate limited)
//! POST   /api/checkout                        - Order + payment intent
//! POST   /api/payments/{intent_id}/confirm    - Reconcile a payment
//! POST   /webhooks/stripe                     - Signed processor events
//!
//! # Operators (bearer token)
//! GET    /admin/api/orders/{order_id}         - Order, history, notifications
//! POST   /admin/api/orders/{order_id}/status  - Operator transition
//! GET    /admin/api/dashboard                 - Counts, revenue, recent orders
//! ```
//!
//! Successful responses are `{"outcome": "success", ...}`; errors are
//! rendered by [`AppError`](crate::error::AppError).

pub mod admin;
pub mod checkout;
pub mod health;
pub mod payments;
pub mod roster;
pub mod webhooks;

use axum::{
    Json, Router,
    routing::{get, patch, post},
};
use serde::Serialize;

use crate::middleware::{checkout_rate_limiter, payments_rate_limiter};
use crate::state::AppState;

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct Success<T: Serialize> {
    outcome: &'static str,
    #[serde(flatten)]
    data: T,
}

/// Wrap a response body in the success envelope.
pub fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        outcome: "success",
        data,
    })
}

/// Create the roster routes router.
pub fn roster_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(roster::show).put(roster::replace).delete(roster::reset),
        )
        .route("/people/{person_id}", patch(roster::update_person))
        .route("/advance", post(roster::advance))
        .route("/retreat", post(roster::retreat))
}

/// Create the operator API router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/{order_id}", get(admin::show_order))
        .route("/orders/{order_id}/status", post(admin::change_status))
        .route("/dashboard", get(admin::dashboard))
}

/// Create all routes for the storefront.
///
/// Rate limiters are applied per route group so they only count the
/// requests they protect.
pub fn routes(rate_limited: bool) -> Router<AppState> {
    let mut checkout = Router::new().route("/api/checkout", post(checkout::create));
    let mut payments =
        Router::new().route("/api/payments/{intent_id}/confirm", post(payments::confirm));
    if rate_limited {
        checkout = checkout.layer(checkout_rate_limiter());
        payments = payments.layer(payments_rate_limiter());
    }

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/api/roster", roster_routes())
        .merge(checkout)
        .merge(payments)
        .route("/webhooks/stripe", post(webhooks::stripe))
        .nest("/admin/api", admin_routes())
}
