//! Order persistence for the storefront.
//!
//! # Database: `atelier`
//!
//! ## Tables
//!
//! - `atelier.orders` - Orders with items (JSONB), totals and current status
//! - `atelier.order_status_events` - Append-only history of accepted transitions
//! - `atelier.notification_log` - Outcome of every status notification attempt
//! - `tower_sessions.session` - Tower-sessions storage (roster state)
//!
//! # Concurrency
//!
//! The order `status` column is the only datum that needs mutual exclusion.
//! Every writer goes through [`OrderStore::compare_and_set_status`], which only
//! succeeds if the stored status still equals the status the caller validated
//! against.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p atelier-cli -- migrate
//! ```

pub mod memory;
pub mod orders;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Serialize;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use atelier_core::{CurrencyCode, Order, OrderId, OrderItem, OrderStatus, PaymentIntentId, TransitionSource};

pub use memory::MemoryOrderStore;
pub use orders::PgOrderStore;

/// Number of orders listed on the operator dashboard.
pub const RECENT_ORDER_LIMIT: usize = 5;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation or a write the current record does not allow.
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// One accepted status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub source: TransitionSource,
    pub changed_at: DateTime<Utc>,
}

/// What happened to a status notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Sent,
    /// No template for the status key.
    Skipped,
    Failed(String),
}

impl NotificationOutcome {
    /// Storage literal.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    /// Rebuild from the stored literal and optional failure reason.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::DataCorruption` for an unknown literal.
    pub fn from_parts(outcome: &str, reason: Option<String>) -> Result<Self, RepositoryError> {
        match outcome {
            "sent" => Ok(Self::Sent),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed(reason.unwrap_or_default())),
            other => Err(RepositoryError::DataCorruption(format!(
                "invalid notification outcome: {other}"
            ))),
        }
    }

    /// Failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            Self::Sent | Self::Skipped => None,
        }
    }
}

/// A logged notification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub order_id: OrderId,
    /// Status key the notification was for (`PROCESSING`).
    pub status_key: String,
    #[serde(flatten)]
    pub outcome: NotificationOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// A record stamped with the current time.
    #[must_use]
    pub fn now(order_id: OrderId, status_key: impl Into<String>, outcome: NotificationOutcome) -> Self {
        Self {
            order_id,
            status_key: status_key.into(),
            outcome,
            recorded_at: Utc::now(),
        }
    }
}

/// Number of orders in one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: u64,
}

/// Dashboard row for a recent order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentOrder {
    pub id: OrderId,
    pub customer_name: String,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
}

/// Aggregates for the operator dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    /// One entry per status, in [`OrderStatus::ALL`] order.
    pub counts: Vec<StatusCount>,
    pub total_orders: u64,
    /// Sum of totals over orders that are not cancelled.
    pub gross_revenue: Decimal,
    /// Most recent orders first.
    pub recent: Vec<RecentOrder>,
}

impl OrderSummary {
    /// Build a summary with a zero entry for every status missing from `counts`.
    #[must_use]
    pub fn from_counts(
        counts: impl IntoIterator<Item = (OrderStatus, u64)>,
        gross_revenue: Decimal,
        recent: Vec<RecentOrder>,
    ) -> Self {
        let counts: Vec<(OrderStatus, u64)> = counts.into_iter().collect();
        let counts: Vec<StatusCount> = OrderStatus::ALL
            .into_iter()
            .map(|status| StatusCount {
                status,
                count: counts
                    .iter()
                    .filter(|(s, _)| *s == status)
                    .map(|(_, n)| n)
                    .sum(),
            })
            .collect();
        let total_orders = counts.iter().map(|c| c.count).sum();
        Self {
            counts,
            total_orders,
            gross_revenue,
            recent,
        }
    }

    /// Count for one status.
    #[must_use]
    pub fn count(&self, status: OrderStatus) -> u64 {
        self.counts
            .iter()
            .find(|c| c.status == status)
            .map_or(0, |c| c.count)
    }
}

/// Items may only change while the order is `PENDING` and no payment intent
/// has been created for its total.
fn check_items_appendable(order: &Order) -> Result<(), RepositoryError> {
    if order.status() != OrderStatus::Pending {
        return Err(RepositoryError::Conflict(format!(
            "order {} is {} and can no longer change",
            order.id(),
            order.status()
        )));
    }
    if let Some(intent_id) = order.payment_intent_id() {
        return Err(RepositoryError::Conflict(format!(
            "order {} is awaiting payment on {intent_id} and can no longer change",
            order.id()
        )));
    }
    Ok(())
}

/// Durable order records.
///
/// Implementations must make [`compare_and_set_status`](Self::compare_and_set_status)
/// atomic with its history row: either both are written or neither is.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the id is taken.
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Load an order by id.
    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Latest committed status of an order.
    async fn get_status(&self, id: &OrderId) -> Result<Option<OrderStatus>, RepositoryError>;

    /// Set `new` only if the stored status still equals `expected`.
    ///
    /// Returns `false` (and writes nothing) if the stored status differs or
    /// the order does not exist.
    async fn compare_and_set_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        new: OrderStatus,
        source: TransitionSource,
    ) -> Result<bool, RepositoryError> {
        self.compare_and_set_status_with_tracking(id, expected, new, source, None)
            .await
    }

    /// [`compare_and_set_status`](Self::compare_and_set_status) that also
    /// stores `tracking_reference` in the same write. A rejected swap leaves
    /// the reference untouched.
    async fn compare_and_set_status_with_tracking(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        new: OrderStatus,
        source: TransitionSource,
        tracking_reference: Option<&str>,
    ) -> Result<bool, RepositoryError>;

    /// Append items to a `PENDING` order and re-derive its totals.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` for an unknown order and
    /// `RepositoryError::Conflict` once the order has left `PENDING` or has a
    /// payment intent attached.
    async fn append_items(&self, id: &OrderId, items: Vec<OrderItem>) -> Result<Order, RepositoryError>;

    /// Link the payment intent created for an order.
    async fn attach_payment_intent(
        &self,
        id: &OrderId,
        intent_id: &PaymentIntentId,
    ) -> Result<(), RepositoryError>;

    /// Accepted transitions for an order, oldest first.
    async fn status_history(&self, id: &OrderId) -> Result<Vec<StatusChange>, RepositoryError>;

    /// Log a notification attempt.
    async fn record_notification(&self, record: NotificationRecord) -> Result<(), RepositoryError>;

    /// Notification attempts for an order, oldest first.
    async fn notifications(&self, id: &OrderId) -> Result<Vec<NotificationRecord>, RepositoryError>;

    /// Dashboard aggregates.
    async fn summary(&self) -> Result<OrderSummary, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_fills_missing_statuses() {
        let summary = OrderSummary::from_counts(
            [(OrderStatus::Pending, 2), (OrderStatus::Completed, 1)],
            Decimal::new(30_000, 2),
            vec![],
        );
        assert_eq!(summary.counts.len(), OrderStatus::ALL.len());
        assert_eq!(summary.count(OrderStatus::Pending), 2);
        assert_eq!(summary.count(OrderStatus::Cancelled), 0);
        assert_eq!(summary.total_orders, 3);
    }

    #[test]
    fn test_notification_outcome_storage_literals() {
        for outcome in [
            NotificationOutcome::Sent,
            NotificationOutcome::Skipped,
            NotificationOutcome::Failed("smtp down".to_owned()),
        ] {
            let rebuilt =
                NotificationOutcome::from_parts(outcome.as_str(), outcome.reason().map(String::from));
            assert_eq!(rebuilt.ok(), Some(outcome));
        }
        assert!(matches!(
            NotificationOutcome::from_parts("bounced", None),
            Err(RepositoryError::DataCorruption(_))
        ));
    }
}
