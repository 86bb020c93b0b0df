//! Operator authorization extractor.
//!
//! Operators authenticate with `Authorization: Bearer <ATELIER_OPERATOR_TOKEN>`.
//! The extractor never rejects; it yields a yes/no signal that the status
//! machine turns into `Unauthorized`.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use secrecy::ExposeSecret;

use crate::services::payments::constant_time_compare;
use crate::state::AppState;

/// Whether the request carries the operator token.
///
/// ```rust,ignore
/// async fn handler(OperatorAuthorization(authorized): OperatorAuthorization) { ... }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuthorization(pub bool);

impl FromRequestParts<AppState> for OperatorAuthorization {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        let authorized = presented.is_some_and(|token| {
            constant_time_compare(token, state.config().operator_token.expose_secret())
        });

        if !authorized && presented.is_some() {
            tracing::warn!("Operator request with wrong token");
        }

        Ok(Self(authorized))
    }
}
