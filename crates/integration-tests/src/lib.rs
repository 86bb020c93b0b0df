//! Cross-module scenario tests for Atelier.
//!
//! Scenarios run against [`MemoryOrderStore`], a [`ScriptedProcessor`] in
//! place of Stripe and a [`RecordingMailer`] in place of SMTP, so the full
//! checkout, payment and notification path runs without external services.
//!
//! ```bash
//! cargo test -p atelier-integration-tests
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc, clippy::indexing_slicing)]

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use atelier_core::{
    AgeGroup, CurrencyCode, Customer, Email, Gender, Order, OrderId, OrderItem, PaymentIntentId,
    Person, PersonId, PriceSchedule,
};
use atelier_storefront::db::{MemoryOrderStore, OrderStore};
use atelier_storefront::services::checkout::CheckoutService;
use atelier_storefront::services::notifications::{
    MailError, MailTransport, NotificationDispatcher, NotificationQueue, NotificationWorker, OutgoingEmail,
};
use atelier_storefront::services::payments::{
    CreatedIntent, IntentMetadata, IntentStatus, PaymentGateway, PaymentProcessor, ProcessorError,
    RetrievedIntent,
};
use atelier_storefront::services::status::OrderStatusMachine;

/// Sender address used by every harness.
pub const FROM_ADDRESS: &str = "orders@atelier.test";

// =============================================================================
// Collaborators
// =============================================================================

/// Payment processor that serves intents from a map.
#[derive(Default)]
pub struct ScriptedProcessor {
    intents: Mutex<HashMap<PaymentIntentId, RetrievedIntent>>,
    created: Mutex<Vec<(i64, IntentMetadata)>>,
    unavailable: AtomicBool,
}

impl ScriptedProcessor {
    /// Register an intent in `status` for `order_id`.
    pub async fn script(&self, intent_id: &str, order_id: &str, amount: i64, status: IntentStatus) {
        self.intents.lock().await.insert(
            PaymentIntentId::new(intent_id),
            RetrievedIntent {
                id: PaymentIntentId::new(intent_id),
                status,
                amount,
                currency: "usd".to_owned(),
                metadata: HashMap::from([(IntentMetadata::ORDER_ID_KEY.to_owned(), order_id.to_owned())]),
            },
        );
    }

    /// Register a succeeded intent.
    pub async fn succeed(&self, intent_id: &str, order_id: &str, amount: i64) {
        self.script(intent_id, order_id, amount, IntentStatus::Succeeded)
            .await;
    }

    /// Make every call fail as if the processor were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Amounts and metadata of every intent created so far.
    pub async fn created(&self) -> Vec<(i64, IntentMetadata)> {
        self.created.lock().await.clone()
    }

    fn check_available(&self) -> Result<(), ProcessorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProcessorError::Transient("connection reset".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn create_intent(
        &self,
        amount_minor: i64,
        _currency: CurrencyCode,
        metadata: &IntentMetadata,
    ) -> Result<CreatedIntent, ProcessorError> {
        self.check_available()?;
        let mut created = self.created.lock().await;
        created.push((amount_minor, metadata.clone()));
        Ok(CreatedIntent {
            id: PaymentIntentId::new(format!("pi_{}", created.len())),
            client_secret: format!("pi_{}_secret", created.len()),
        })
    }

    async fn retrieve_intent(&self, intent_id: &PaymentIntentId) -> Result<RetrievedIntent, ProcessorError> {
        self.check_available()?;
        self.intents
            .lock()
            .await
            .get(intent_id)
            .cloned()
            .ok_or(ProcessorError::Rejected {
                status: 404,
                message: "No such payment_intent".to_owned(),
            })
    }
}

/// Mail transport that keeps what it was asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    /// Make every send fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }

    pub async fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|email| email.subject.clone())
            .collect()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Unavailable("connection refused".to_owned()));
        }
        self.sent.lock().await.push(email);
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Services wired the way the storefront wires them, over in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryOrderStore>,
    pub processor: Arc<ScriptedProcessor>,
    pub mailer: Arc<RecordingMailer>,
    pub dispatcher: NotificationDispatcher,
    pub status: OrderStatusMachine,
    pub gateway: PaymentGateway,
    pub checkout: CheckoutService,
    worker: NotificationWorker,
}

impl Harness {
    /// A harness whose queue holds `capacity` events.
    #[must_use]
    pub fn with_queue_capacity(capacity: usize) -> Self {
        let store = Arc::new(MemoryOrderStore::new());
        let processor = Arc::new(ScriptedProcessor::default());
        let mailer = Arc::new(RecordingMailer::default());

        let (queue, receiver) = NotificationQueue::channel(capacity);
        let dispatcher = NotificationDispatcher::new(mailer.clone(), FROM_ADDRESS);
        let worker = NotificationWorker::new(receiver, store.clone(), dispatcher.clone());
        let status = OrderStatusMachine::new(store.clone(), queue);
        let gateway = PaymentGateway::new(processor.clone(), store.clone(), status.clone());
        let checkout = CheckoutService::new(store.clone(), gateway.clone(), PriceSchedule::default());

        Self {
            store,
            processor,
            mailer,
            dispatcher,
            status,
            gateway,
            checkout,
            worker,
        }
    }

    /// Deliver every queued notification; returns how many were handled.
    pub async fn drain(&mut self) -> usize {
        self.worker.drain().await
    }

    /// Store a one-item `PENDING` order worth `cents`.
    pub async fn insert_order(&self, id: &str, cents: i64) -> Order {
        let order = order(id, cents);
        self.store.insert_order(&order).await.unwrap();
        order
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::with_queue_capacity(64)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

#[must_use]
pub fn customer() -> Customer {
    Customer {
        name: "Ada Lovelace".to_owned(),
        email: Email::parse("ada@example.com").unwrap(),
    }
}

/// A one-item `PENDING` order worth `cents`.
#[must_use]
pub fn order(id: &str, cents: i64) -> Order {
    let item = OrderItem {
        name: "Linen jacket".to_owned(),
        price: Decimal::new(cents, 2),
        quantity: NonZeroU32::MIN,
        size: "M".to_owned(),
        color: None,
        is_custom: false,
        measurements: None,
        person_name: Some("Ada".to_owned()),
    };
    Order::new(OrderId::new(id), customer(), vec![item], CurrencyCode::USD, None, Utc::now()).unwrap()
}

/// A person with a design and a stock size.
#[must_use]
pub fn complete_person(id: &str, age_group: AgeGroup) -> Person {
    let mut person = Person::new(PersonId::new(id), format!("Person {id}"), Gender::Women, age_group);
    person.design_id = Some("linen-wrap".to_owned());
    person.size = Some("M".to_owned());
    person
}

/// A person with nothing chosen yet.
#[must_use]
pub fn blank_person(id: &str) -> Person {
    Person::new(PersonId::new(id), format!("Person {id}"), Gender::Men, AgeGroup::Adult)
}
