//! `PostgreSQL` order repository.
//!
//! Queries are built at runtime (`sqlx::query`) so the crate builds without a
//! live database. Items are stored as JSONB in display order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::types::Json;

use atelier_core::{
    CurrencyCode, Customer, Email, Order, OrderId, OrderItem, OrderParts, OrderStatus,
    PaymentIntentId, TransitionSource,
};

use super::{
    NotificationOutcome, NotificationRecord, OrderStore, OrderSummary, RECENT_ORDER_LIMIT,
    RecentOrder, RepositoryError, StatusChange,
};

const ORDER_COLUMNS: &str = "id, customer_name, customer_email, items, currency, subtotal, \
     tax_rate, total, status, order_date, payment_intent_id, tracking_reference";

/// Order repository backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn corruption(context: &str, e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::DataCorruption(format!("{context}: {e}"))
}

fn parse_currency(code: &str) -> Result<CurrencyCode, RepositoryError> {
    code.parse::<CurrencyCode>()
        .map_err(|e| corruption("invalid currency in database", e))
}

// =============================================================================
// Row types
// =============================================================================

/// Database row for `atelier.orders`.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    customer_name: String,
    customer_email: String,
    items: Json<Vec<OrderItem>>,
    currency: String,
    subtotal: Decimal,
    tax_rate: Option<Decimal>,
    total: Decimal,
    status: OrderStatus,
    order_date: DateTime<Utc>,
    payment_intent_id: Option<PaymentIntentId>,
    tracking_reference: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    /// Rebuild an order, re-checking the subtotal invariant.
    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.customer_email)
            .map_err(|e| corruption("invalid email in database", e))?;
        let parts = OrderParts {
            id: row.id,
            customer: Customer {
                name: row.customer_name,
                email,
            },
            items: row.items.0,
            currency: parse_currency(&row.currency)?,
            subtotal: row.subtotal,
            tax_rate: row.tax_rate,
            total: row.total,
            status: row.status,
            order_date: row.order_date,
            payment_intent_id: row.payment_intent_id,
            tracking_reference: row.tracking_reference,
        };
        Self::restore(parts).map_err(|e| corruption("order failed validation", e))
    }
}

/// Database row for the dashboard's recent orders.
#[derive(Debug, sqlx::FromRow)]
struct RecentOrderRow {
    id: OrderId,
    customer_name: String,
    total: Decimal,
    currency: String,
    status: OrderStatus,
    order_date: DateTime<Utc>,
}

impl TryFrom<RecentOrderRow> for RecentOrder {
    type Error = RepositoryError;

    fn try_from(row: RecentOrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            customer_name: row.customer_name,
            total: row.total,
            currency: parse_currency(&row.currency)?,
            status: row.status,
            order_date: row.order_date,
        })
    }
}

/// Database row for `atelier.order_status_events`.
#[derive(Debug, sqlx::FromRow)]
struct StatusEventRow {
    order_id: OrderId,
    from_status: OrderStatus,
    to_status: OrderStatus,
    source: String,
    changed_at: DateTime<Utc>,
}

impl TryFrom<StatusEventRow> for StatusChange {
    type Error = RepositoryError;

    fn try_from(row: StatusEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            order_id: row.order_id,
            from: row.from_status,
            to: row.to_status,
            source: row
                .source
                .parse()
                .map_err(|e: String| corruption("invalid transition source", e))?,
            changed_at: row.changed_at,
        })
    }
}

/// Database row for `atelier.notification_log`.
#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    order_id: OrderId,
    status_key: String,
    outcome: String,
    reason: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = RepositoryError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            order_id: row.order_id,
            status_key: row.status_key,
            outcome: NotificationOutcome::from_parts(&row.outcome, row.reason)?,
            recorded_at: row.recorded_at,
        })
    }
}

/// Map a unique violation to `Conflict`.
fn unique_violation(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO atelier.orders
                (id, customer_name, customer_email, items, currency, subtotal,
                 tax_rate, total, status, order_date, payment_intent_id, tracking_reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(order.id())
        .bind(&order.customer().name)
        .bind(&order.customer().email)
        .bind(Json(order.items()))
        .bind(order.currency().code())
        .bind(order.subtotal().amount)
        .bind(order.tax_rate())
        .bind(order.total().amount)
        .bind(order.status())
        .bind(order.order_date())
        .bind(order.payment_intent_id())
        .bind(order.tracking_reference())
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "order"))?;

        Ok(())
    }

    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM atelier.orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    async fn get_status(&self, id: &OrderId) -> Result<Option<OrderStatus>, RepositoryError> {
        let status = sqlx::query_scalar::<_, OrderStatus>(
            "SELECT status FROM atelier.orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    async fn compare_and_set_status_with_tracking(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        new: OrderStatus,
        source: TransitionSource,
        tracking_reference: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r"
            UPDATE atelier.orders
            SET status = $3,
                tracking_reference = COALESCE($4, tracking_reference),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .bind(tracking_reference)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r"
            INSERT INTO atelier.order_status_events (order_id, from_status, to_status, source)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .bind(source.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn append_items(&self, id: &OrderId, items: Vec<OrderItem>) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Row lock so a concurrent transition or intent attach cannot slip in
        // between the checks and the write.
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM atelier.orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        let order = Order::try_from(row)?;
        super::check_items_appendable(&order)?;

        let grown = order
            .with_items_appended(items)
            .map_err(|e| RepositoryError::Conflict(e.to_string()))?;

        sqlx::query(
            r"
            UPDATE atelier.orders
            SET items = $2, subtotal = $3, total = $4, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(Json(grown.items()))
        .bind(grown.subtotal().amount)
        .bind(grown.total().amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(grown)
    }

    async fn attach_payment_intent(
        &self,
        id: &OrderId,
        intent_id: &PaymentIntentId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE atelier.orders SET payment_intent_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(intent_id)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "payment intent"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn status_history(&self, id: &OrderId) -> Result<Vec<StatusChange>, RepositoryError> {
        let rows = sqlx::query_as::<_, StatusEventRow>(
            r"
            SELECT order_id, from_status, to_status, source, changed_at
            FROM atelier.order_status_events
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StatusChange::try_from).collect()
    }

    async fn record_notification(&self, record: NotificationRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO atelier.notification_log (order_id, status_key, outcome, reason, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&record.order_id)
        .bind(&record.status_key)
        .bind(record.outcome.as_str())
        .bind(record.outcome.reason())
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn notifications(&self, id: &OrderId) -> Result<Vec<NotificationRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r"
            SELECT order_id, status_key, outcome, reason, recorded_at
            FROM atelier.notification_log
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationRecord::try_from).collect()
    }

    async fn summary(&self) -> Result<OrderSummary, RepositoryError> {
        let count_rows = sqlx::query_as::<_, (OrderStatus, i64)>(
            "SELECT status, COUNT(*) AS count FROM atelier.orders GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let counts = count_rows
            .into_iter()
            .map(|(status, count)| {
                u64::try_from(count)
                    .map(|count| (status, count))
                    .map_err(|e| corruption("negative count", e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let gross_revenue: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total), 0) FROM atelier.orders WHERE status <> 'CANCELLED'",
        )
        .fetch_one(&self.pool)
        .await?;

        let recent_rows = sqlx::query_as::<_, RecentOrderRow>(
            r"
            SELECT id, customer_name, total, currency, status, order_date
            FROM atelier.orders
            ORDER BY order_date DESC
            LIMIT $1
            ",
        )
        .bind(i64::try_from(RECENT_ORDER_LIMIT).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        let recent = recent_rows
            .into_iter()
            .map(RecentOrder::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderSummary::from_counts(counts, gross_revenue, recent))
    }
}
