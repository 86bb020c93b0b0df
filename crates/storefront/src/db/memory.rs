//! In-memory order store for tests and local development.
//!
//! A single `tokio::sync::Mutex` guards all maps, so compare-and-set and its
//! history row happen under one lock acquisition.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use atelier_core::{Order, OrderId, OrderItem, OrderStatus, PaymentIntentId, TransitionSource};

use super::{
    NotificationRecord, OrderStore, OrderSummary, RECENT_ORDER_LIMIT, RecentOrder, RepositoryError,
    StatusChange,
};

#[derive(Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    history: HashMap<OrderId, Vec<StatusChange>>,
    notifications: HashMap<OrderId, Vec<NotificationRecord>>,
}

/// `OrderStore` backed by process memory.
#[derive(Default)]
pub struct MemoryOrderStore {
    state: Mutex<MemoryState>,
}

impl MemoryOrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(order.id()) {
            return Err(RepositoryError::Conflict(format!(
                "order {} already exists",
                order.id()
            )));
        }
        state.orders.insert(order.id().clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.state.lock().await.orders.get(id).cloned())
    }

    async fn get_status(&self, id: &OrderId) -> Result<Option<OrderStatus>, RepositoryError> {
        Ok(self.state.lock().await.orders.get(id).map(Order::status))
    }

    async fn compare_and_set_status_with_tracking(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        new: OrderStatus,
        source: TransitionSource,
        tracking_reference: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get(id) else {
            return Ok(false);
        };
        if order.status() != expected {
            return Ok(false);
        }
        let mut updated = order.clone().with_status(new);
        if let Some(reference) = tracking_reference {
            updated = updated.with_tracking_reference(reference);
        }
        state.orders.insert(id.clone(), updated);
        state.history.entry(id.clone()).or_default().push(StatusChange {
            order_id: id.clone(),
            from: expected,
            to: new,
            source,
            changed_at: Utc::now(),
        });
        Ok(true)
    }

    async fn append_items(&self, id: &OrderId, items: Vec<OrderItem>) -> Result<Order, RepositoryError> {
        let mut state = self.state.lock().await;
        let order = state.orders.get(id).ok_or(RepositoryError::NotFound)?;
        super::check_items_appendable(order)?;
        let grown = order
            .with_items_appended(items)
            .map_err(|e| RepositoryError::Conflict(e.to_string()))?;
        state.orders.insert(id.clone(), grown.clone());
        Ok(grown)
    }

    async fn attach_payment_intent(
        &self,
        id: &OrderId,
        intent_id: &PaymentIntentId,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let order = state.orders.remove(id).ok_or(RepositoryError::NotFound)?;
        state
            .orders
            .insert(id.clone(), order.with_payment_intent(intent_id.clone()));
        Ok(())
    }

    async fn status_history(&self, id: &OrderId) -> Result<Vec<StatusChange>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .history
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_notification(&self, record: NotificationRecord) -> Result<(), RepositoryError> {
        self.state
            .lock()
            .await
            .notifications
            .entry(record.order_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn notifications(&self, id: &OrderId) -> Result<Vec<NotificationRecord>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .notifications
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn summary(&self) -> Result<OrderSummary, RepositoryError> {
        let state = self.state.lock().await;

        let counts = OrderStatus::ALL.map(|status| {
            let n = state.orders.values().filter(|o| o.status() == status).count();
            (status, n as u64)
        });

        let gross_revenue = state
            .orders
            .values()
            .filter(|o| o.status() != OrderStatus::Cancelled)
            .try_fold(Decimal::ZERO, |acc, o| acc.checked_add(o.total().amount))
            .ok_or_else(|| RepositoryError::DataCorruption("revenue overflow".to_owned()))?;

        let mut recent: Vec<&Order> = state.orders.values().collect();
        recent.sort_by(|a, b| b.order_date().cmp(&a.order_date()));
        let recent = recent
            .into_iter()
            .take(RECENT_ORDER_LIMIT)
            .map(|o| RecentOrder {
                id: o.id().clone(),
                customer_name: o.customer().name.clone(),
                total: o.total().amount,
                currency: o.currency(),
                status: o.status(),
                order_date: o.order_date(),
            })
            .collect();

        Ok(OrderSummary::from_counts(counts, gross_revenue, recent))
    }
}
