//! Order status transitions.
//!
//! [`OrderStatusMachine`] is the only writer of order status. Each request is
//! a read-validate-write against the order store: read the committed status,
//! check the transition table, then compare-and-set. If another writer got in
//! between, the compare-and-set fails and the request is rejected as stale.
//! Nothing here holds a lock across network I/O; the notification is queued
//! after the write has committed.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use atelier_core::{InvalidTransition, OrderId, OrderStatus, TransitionSource};

use crate::db::{NotificationOutcome, NotificationRecord, OrderStore, RepositoryError};
use crate::services::notifications::{NotificationQueue, StatusChanged};

/// Errors from a status change request.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The transition table does not allow this change.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Another writer changed the status after it was read.
    #[error("order {order_id} is {actual}, expected {expected}")]
    Stale {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// The caller is not allowed to change status.
    #[error("caller is not authorized to change order status")]
    Unauthorized,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl StatusError {
    /// Whether this is a permanent rejection rather than an infrastructure failure.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Repository(_))
    }
}

/// An accepted, committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub source: TransitionSource,
}

/// Authoritative order status.
#[derive(Clone)]
pub struct OrderStatusMachine {
    store: Arc<dyn OrderStore>,
    notifications: NotificationQueue,
}

impl OrderStatusMachine {
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, notifications: NotificationQueue) -> Self {
        Self {
            store,
            notifications,
        }
    }

    /// Move an order to `target`.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound` if the order does not exist
    /// - `InvalidTransition` if the table rejects `current -> target`
    /// - `Stale` if another writer changed the status first
    /// - `Repository` on store failures
    #[instrument(skip_all, fields(order_id = %order_id, to = %target, source = %source))]
    pub async fn request_transition(
        &self,
        order_id: &OrderId,
        target: OrderStatus,
        source: TransitionSource,
    ) -> Result<Transition, StatusError> {
        self.transition(order_id, target, source, None).await
    }

    /// Operator-requested transition.
    ///
    /// `authorized` is the caller's yes/no authorization signal. A tracking
    /// reference, if given, is written together with the new status so the
    /// notification can include it; a rejected request leaves it unset.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` when `authorized` is false, otherwise as
    /// [`request_transition`](Self::request_transition).
    #[instrument(skip_all, fields(order_id = %order_id, to = %target))]
    pub async fn operator_transition(
        &self,
        order_id: &OrderId,
        target: OrderStatus,
        tracking_reference: Option<&str>,
        authorized: bool,
    ) -> Result<Transition, StatusError> {
        if !authorized {
            warn!("Unauthorized status change attempt");
            return Err(StatusError::Unauthorized);
        }

        let reference = tracking_reference.map(str::trim).filter(|r| !r.is_empty());
        self.transition(order_id, target, TransitionSource::Operator, reference)
            .await
    }

    async fn transition(
        &self,
        order_id: &OrderId,
        target: OrderStatus,
        source: TransitionSource,
        tracking_reference: Option<&str>,
    ) -> Result<Transition, StatusError> {
        let current = self
            .store
            .get_status(order_id)
            .await?
            .ok_or_else(|| StatusError::OrderNotFound(order_id.clone()))?;

        current.check_transition(target)?;

        let committed = self
            .store
            .compare_and_set_status_with_tracking(order_id, current, target, source, tracking_reference)
            .await?;

        if !committed {
            let actual = self
                .store
                .get_status(order_id)
                .await?
                .ok_or_else(|| StatusError::OrderNotFound(order_id.clone()))?;
            warn!(from = %current, actual = %actual, "Status changed concurrently, rejecting");
            return Err(StatusError::Stale {
                order_id: order_id.clone(),
                expected: current,
                actual,
            });
        }

        info!(from = %current, "Order status changed");
        self.announce(order_id, target).await;

        Ok(Transition {
            order_id: order_id.clone(),
            from: current,
            to: target,
            source,
        })
    }

    /// Hand the change to the notification worker. A full or closed queue is
    /// recorded as a failed notification.
    async fn announce(&self, order_id: &OrderId, status: OrderStatus) {
        let event = StatusChanged {
            order_id: order_id.clone(),
            status,
        };
        if let Err(e) = self.notifications.enqueue(event) {
            error!(order_id = %order_id, status = %status, error = %e, "Could not queue status notification");
            let record = NotificationRecord::now(
                order_id.clone(),
                status.as_str(),
                NotificationOutcome::Failed(e.to_string()),
            );
            if let Err(e) = self.store.record_notification(record).await {
                error!(order_id = %order_id, error = %e, "Failed to record notification failure");
            }
        }
    }
}
