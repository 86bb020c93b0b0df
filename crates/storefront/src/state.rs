//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::OrderStore;
use crate::services::checkout::CheckoutService;
use crate::services::notifications::{
    MailTransport, NotificationDispatcher, NotificationQueue, NotificationWorker,
};
use crate::services::payments::{PaymentGateway, PaymentProcessor};
use crate::services::status::OrderStatusMachine;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// order store, the status machine and the payment and checkout services.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    store: Arc<dyn OrderStore>,
    status: OrderStatusMachine,
    payments: PaymentGateway,
    checkout: CheckoutService,
}

impl AppState {
    /// Wire the services together.
    ///
    /// Returns the state and the notification worker that consumes its
    /// status events; the caller decides where the worker runs.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `store` - Order store (`PostgreSQL` in production)
    /// * `processor` - Payment processor client
    /// * `mail` - Outgoing mail transport
    /// * `pool` - Database pool, used by the readiness probe when present
    #[must_use]
    pub fn new(
        config: StorefrontConfig,
        store: Arc<dyn OrderStore>,
        processor: Arc<dyn PaymentProcessor>,
        mail: Arc<dyn MailTransport>,
        pool: Option<PgPool>,
    ) -> (Self, NotificationWorker) {
        let (queue, receiver) = NotificationQueue::channel(config.notification_queue_capacity);
        let dispatcher = NotificationDispatcher::new(mail, config.email.from_address.clone());
        let worker = NotificationWorker::new(receiver, store.clone(), dispatcher);

        let status = OrderStatusMachine::new(store.clone(), queue);
        let payments = PaymentGateway::new(processor, store.clone(), status.clone());
        let checkout = CheckoutService::new(store.clone(), payments.clone(), config.pricing.clone());

        let state = Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                store,
                status,
                payments,
                checkout,
            }),
        };
        (state, worker)
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get the database pool, if the state is backed by `PostgreSQL`.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> &dyn OrderStore {
        self.inner.store.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> &OrderStatusMachine {
        &self.inner.status
    }

    #[must_use]
    pub fn payments(&self) -> &PaymentGateway {
        &self.inner.payments
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }
}
