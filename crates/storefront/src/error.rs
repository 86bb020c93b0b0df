//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. An error renders as
//!
//! ```json
//! {"outcome": "rejected", "reason": "INVALID_TRANSITION", "message": "..."}
//! ```
//!
//! where `outcome` tells the caller whether retrying can ever help:
//! `rejected` is permanent (4xx), `failure` is transient or internal (5xx).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use atelier_core::RosterError;

use crate::db::RepositoryError;
use crate::services::checkout::CheckoutError;
use crate::services::payments::{PaymentError, ProcessorError};
use crate::services::status::StatusError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operator credentials missing or wrong.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Whether retrying can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The request will never succeed as sent.
    Rejected,
    /// An external dependency is unavailable; retry later.
    Transient,
    /// A defect or infrastructure failure on our side.
    Internal,
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub outcome: &'static str,
    pub reason: &'static str,
    pub message: String,
}

fn roster_reason(e: &RosterError) -> (StatusCode, &'static str) {
    match e {
        RosterError::UnknownPerson(_) => (StatusCode::NOT_FOUND, "UNKNOWN_PERSON"),
        RosterError::DuplicatePerson(_) => (StatusCode::BAD_REQUEST, "DUPLICATE_PERSON"),
        RosterError::NotReady { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "ROSTER_NOT_READY"),
    }
}

fn repository_reason(e: &RepositoryError) -> (StatusCode, &'static str) {
    match e {
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        RepositoryError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        RepositoryError::Database(_) | RepositoryError::DataCorruption(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
        }
    }
}

fn status_reason(e: &StatusError) -> (StatusCode, &'static str) {
    match e {
        StatusError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
        StatusError::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        StatusError::Stale { .. } => (StatusCode::CONFLICT, "STALE_STATUS"),
        StatusError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        StatusError::Repository(e) => repository_reason(e),
    }
}

fn payment_reason(e: &PaymentError) -> (StatusCode, &'static str) {
    match e {
        PaymentError::Processor(ProcessorError::Transient(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "PAYMENT_PROCESSOR_UNAVAILABLE")
        }
        PaymentError::Processor(ProcessorError::Rejected { .. }) => {
            (StatusCode::PAYMENT_REQUIRED, "PAYMENT_REJECTED")
        }
        PaymentError::Processor(ProcessorError::Malformed(_)) => {
            (StatusCode::BAD_GATEWAY, "PAYMENT_PROCESSOR_ERROR")
        }
        PaymentError::NotCompleted { .. } => (StatusCode::CONFLICT, "PAYMENT_NOT_COMPLETED"),
        PaymentError::AmountMismatch { .. } => (StatusCode::CONFLICT, "PAYMENT_AMOUNT_MISMATCH"),
        PaymentError::CurrencyMismatch { .. } => {
            (StatusCode::CONFLICT, "PAYMENT_CURRENCY_MISMATCH")
        }
        PaymentError::MissingOrderId(_) => (StatusCode::UNPROCESSABLE_ENTITY, "PAYMENT_UNLINKED"),
        PaymentError::IntentMismatch { .. } => (StatusCode::CONFLICT, "PAYMENT_INTENT_MISMATCH"),
        PaymentError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
        PaymentError::InvalidSignature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
        PaymentError::Money(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_AMOUNT"),
        PaymentError::Status(e) => status_reason(e),
        PaymentError::Repository(e) => repository_reason(e),
    }
}

impl AppError {
    /// HTTP status and machine-readable reason code.
    #[must_use]
    pub fn reason(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Roster(e) => roster_reason(e),
            Self::Status(e) => status_reason(e),
            Self::Payment(e) => payment_reason(e),
            Self::Checkout(e) => match e {
                CheckoutError::RosterNotReady(e) => roster_reason(e),
                CheckoutError::Order(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_ORDER"),
                CheckoutError::Payment(e) => payment_reason(e),
                CheckoutError::Repository(e) => repository_reason(e),
            },
            Self::Database(e) => repository_reason(e),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }

    /// Rejection, transient failure, or internal failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        let (status, _) = self.reason();
        match status {
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => ErrorKind::Transient,
            s if s.is_server_error() => ErrorKind::Internal,
            _ => ErrorKind::Rejected,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, reason) = self.reason();
        let kind = self.kind();

        // Capture server errors to Sentry
        if kind != ErrorKind::Rejected {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                reason,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match kind {
            ErrorKind::Internal => "Internal server error".to_owned(),
            ErrorKind::Transient => "External service unavailable, try again later".to_owned(),
            ErrorKind::Rejected => self.to_string(),
        };

        let body = ErrorBody {
            outcome: if kind == ErrorKind::Rejected {
                "rejected"
            } else {
                "failure"
            },
            reason,
            message,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for an order-level action.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_owned()),
        message: Some(message.to_owned()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_owned(),
                serde_json::Value::String((*value).to_owned()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
