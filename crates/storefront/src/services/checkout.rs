//! Checkout: roster to `PENDING` order to payment intent.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument};

use atelier_core::{
    CurrencyCode, Customer, DraftError, OrderDraft, OrderError, OrderId, PaymentIntentId,
    PersonRoster, PriceSchedule, RosterError,
};

use crate::db::{OrderStore, RepositoryError};
use crate::services::payments::{PaymentError, PaymentGateway};

/// Errors from starting a checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Someone in the roster is incomplete, or the roster is empty.
    #[error(transparent)]
    RosterNotReady(RosterError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<DraftError> for CheckoutError {
    fn from(e: DraftError) -> Self {
        match e {
            DraftError::Roster(e) => Self::RosterNotReady(e),
            DraftError::Order(e) => Self::Order(e),
        }
    }
}

/// What the payer's client needs to complete payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub order_id: OrderId,
    pub payment_intent_id: PaymentIntentId,
    pub client_secret: String,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
}

/// Turns a checkout-ready roster into an order awaiting payment.
#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn OrderStore>,
    gateway: PaymentGateway,
    schedule: PriceSchedule,
}

impl CheckoutService {
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, gateway: PaymentGateway, schedule: PriceSchedule) -> Self {
        Self {
            store,
            gateway,
            schedule,
        }
    }

    /// Price the roster, store the order as `PENDING`, and open a payment
    /// intent for its total.
    ///
    /// If the intent cannot be created the order stays `PENDING` without an
    /// intent; it never reaches `PROCESSING` and an operator may cancel it.
    ///
    /// # Errors
    ///
    /// - `RosterNotReady` unless every person is complete
    /// - `Payment` if the processor refuses or is unavailable
    /// - `Repository` on store failures
    #[instrument(skip_all, fields(people = roster.len(), order_id))]
    pub async fn begin(&self, roster: &PersonRoster, customer: Customer) -> Result<CheckoutSession, CheckoutError> {
        let draft = OrderDraft::from_roster(roster, customer, &self.schedule)?;
        let order = draft.into_order(OrderId::generate(), Utc::now())?;
        tracing::Span::current().record("order_id", order.id().as_str());

        self.store.insert_order(&order).await?;
        info!(total = %order.total(), items = order.items().len(), "Order created");

        let amount = order.total();
        let intent = self
            .gateway
            .create_intent(order.id(), &amount, &order.customer().email)
            .await
            .inspect_err(|e| error!(error = %e, "Could not create payment intent"))?;

        self.store
            .attach_payment_intent(order.id(), &intent.id)
            .await?;

        Ok(CheckoutSession {
            order_id: order.id().clone(),
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            amount_minor: amount.to_minor_units().map_err(PaymentError::from)?,
            currency: amount.currency,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use atelier_core::{AgeGroup, Email, Gender, OrderStatus, Person, PersonId};

    use super::*;
    use crate::db::MemoryOrderStore;
    use crate::services::notifications::NotificationQueue;
    use crate::services::payments::tests::ScriptedProcessor;
    use crate::services::status::OrderStatusMachine;

    fn person(id: &str, age_group: AgeGroup) -> Person {
        let mut person = Person::new(PersonId::new(id), "Ada", Gender::Women, age_group);
        person.design_id = Some("design-7".to_owned());
        person.size = Some("M".to_owned());
        person
    }

    fn customer() -> Customer {
        Customer {
            name: "Grace Hopper".to_owned(),
            email: Email::parse("grace@example.com").unwrap(),
        }
    }

    fn service() -> (CheckoutService, Arc<MemoryOrderStore>, Arc<ScriptedProcessor>) {
        let store = Arc::new(MemoryOrderStore::new());
        let processor = Arc::new(ScriptedProcessor::default());
        let (queue, _receiver) = NotificationQueue::channel(4);
        let status = OrderStatusMachine::new(store.clone(), queue);
        let gateway = PaymentGateway::new(processor.clone(), store.clone(), status);
        (
            CheckoutService::new(store.clone(), gateway, PriceSchedule::default()),
            store,
            processor,
        )
    }

    #[tokio::test]
    async fn test_begin_creates_pending_order_with_intent() {
        let (checkout, store, processor) = service();
        let mut roster = PersonRoster::new();
        roster
            .replace(vec![person("p1", AgeGroup::Adult), person("p2", AgeGroup::Child)])
            .unwrap();

        let session = checkout.begin(&roster, customer()).await.unwrap();

        let order = store.get_order(&session.order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.payment_intent_id(), Some(&session.payment_intent_id));
        assert_eq!(session.amount_minor, order.total().to_minor_units().unwrap());
        assert_eq!(order.subtotal().amount, Decimal::new(20_000, 2));

        let created = processor.created.lock().await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].1.order_id, session.order_id);
    }

    #[tokio::test]
    async fn test_incomplete_roster_is_rejected_before_any_order() {
        let (checkout, store, processor) = service();
        let mut roster = PersonRoster::new();
        let mut unfinished = person("p2", AgeGroup::Adult);
        unfinished.size = None;
        roster
            .replace(vec![person("p1", AgeGroup::Adult), unfinished])
            .unwrap();

        let err = checkout.begin(&roster, customer()).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::RosterNotReady(RosterError::NotReady { ref incomplete }) if incomplete == &[PersonId::new("p2")]
        ));
        assert_eq!(store.summary().await.unwrap().total_orders, 0);
        assert!(processor.created.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_roster_is_not_ready() {
        let (checkout, _store, _processor) = service();
        let err = checkout
            .begin(&PersonRoster::new(), customer())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::RosterNotReady(_)));
    }
}
