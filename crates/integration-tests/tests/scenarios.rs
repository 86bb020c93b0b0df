//! End-to-end order scenarios: checkout gating, payment confirmation,
//! replayed confirmations, backward operator moves and amount mismatches.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use atelier_core::{AgeGroup, OrderId, OrderStatus, PersonId, PersonRoster, RosterError, TransitionSource};
use atelier_integration_tests::{Harness, blank_person, complete_person, customer};
use atelier_storefront::db::{NotificationOutcome, OrderStore};
use atelier_storefront::services::checkout::CheckoutError;
use atelier_storefront::services::payments::{ConfirmOutcome, PaymentError};
use atelier_storefront::services::status::StatusError;

// =============================================================================
// Checkout gating
// =============================================================================

#[tokio::test]
async fn test_incomplete_roster_cannot_open_payment_intent() {
    let harness = Harness::default();
    let mut roster = PersonRoster::new();
    roster.replace(vec![blank_person("p1")]).unwrap();

    let err = harness.checkout.begin(&roster, customer()).await.unwrap_err();

    match err {
        CheckoutError::RosterNotReady(RosterError::NotReady { incomplete }) => {
            assert_eq!(incomplete, vec![PersonId::new("p1")]);
        }
        other => panic!("expected RosterNotReady, got {other:?}"),
    }
    assert!(harness.processor.created().await.is_empty());
    assert_eq!(harness.store.summary().await.unwrap().total_orders, 0);
}

#[tokio::test]
async fn test_empty_roster_is_not_checkout_ready() {
    let harness = Harness::default();

    let err = harness
        .checkout
        .begin(&PersonRoster::new(), customer())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::RosterNotReady(RosterError::NotReady { ref incomplete }) if incomplete.is_empty()
    ));
    assert!(harness.processor.created().await.is_empty());
}

// =============================================================================
// Confirmation
// =============================================================================

#[tokio::test]
async fn test_confirmed_payment_moves_order_to_processing() {
    let mut harness = Harness::default();
    harness.insert_order("O1", 10_000).await;
    harness.processor.succeed("pi_B", "O1", 10_000).await;

    let outcome = harness
        .gateway
        .confirm_intent(&"pi_B".into())
        .await
        .unwrap();

    let ConfirmOutcome::Confirmed { transition } = outcome else {
        panic!("expected Confirmed, got {outcome:?}");
    };
    assert_eq!(transition.from, OrderStatus::Pending);
    assert_eq!(transition.to, OrderStatus::Processing);
    assert_eq!(transition.source, TransitionSource::Payment);

    assert_eq!(harness.drain().await, 1);
    assert_eq!(harness.mailer.subjects().await, vec!["Your order is being made"]);

    let id = OrderId::new("O1");
    assert_eq!(harness.store.get_status(&id).await.unwrap(), Some(OrderStatus::Processing));
    let notifications = harness.store.notifications(&id).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status_key, "PROCESSING");
    assert_eq!(notifications[0].outcome, NotificationOutcome::Sent);
}

#[tokio::test]
async fn test_replayed_confirmation_sends_nothing() {
    let mut harness = Harness::default();
    harness.insert_order("O1", 10_000).await;
    harness.processor.succeed("pi_B", "O1", 10_000).await;
    harness.gateway.confirm_intent(&"pi_B".into()).await.unwrap();
    harness.drain().await;

    let replay = harness
        .gateway
        .confirm_intent(&"pi_B".into())
        .await
        .unwrap();

    assert_eq!(
        replay,
        ConfirmOutcome::AlreadyConfirmed {
            order_id: OrderId::new("O1"),
            status: OrderStatus::Processing,
        }
    );
    assert_eq!(harness.drain().await, 0);
    assert_eq!(harness.mailer.sent().await.len(), 1);
    assert_eq!(harness.store.status_history(&OrderId::new("O1")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_replay_after_order_moved_on_is_still_idempotent() {
    let mut harness = Harness::default();
    let id = OrderId::new("O1");
    harness.insert_order("O1", 10_000).await;
    harness.processor.succeed("pi_B", "O1", 10_000).await;
    harness.gateway.confirm_intent(&"pi_B".into()).await.unwrap();
    harness
        .status
        .operator_transition(&id, OrderStatus::ReadyForPickup, None, true)
        .await
        .unwrap();
    harness.drain().await;

    let replay = harness
        .gateway
        .confirm_intent(&"pi_B".into())
        .await
        .unwrap();

    assert!(matches!(
        replay,
        ConfirmOutcome::AlreadyConfirmed { status: OrderStatus::ReadyForPickup, .. }
    ));
    assert_eq!(harness.store.get_status(&id).await.unwrap(), Some(OrderStatus::ReadyForPickup));
    assert_eq!(harness.mailer.sent().await.len(), 2);
}

// =============================================================================
// Rejections
// =============================================================================

#[tokio::test]
async fn test_backward_operator_transition_is_rejected() {
    let mut harness = Harness::default();
    let id = OrderId::new("O1");
    harness.insert_order("O1", 10_000).await;
    for target in [OrderStatus::Processing, OrderStatus::ReadyForPickup, OrderStatus::Completed] {
        harness
            .status
            .operator_transition(&id, target, None, true)
            .await
            .unwrap();
    }
    harness.drain().await;
    let history_before = harness.store.status_history(&id).await.unwrap();

    let err = harness
        .status
        .operator_transition(&id, OrderStatus::Processing, None, true)
        .await
        .unwrap_err();

    match err {
        StatusError::InvalidTransition(rejected) => {
            assert_eq!(rejected.from, OrderStatus::Completed);
            assert_eq!(rejected.to, OrderStatus::Processing);
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert_eq!(harness.store.get_status(&id).await.unwrap(), Some(OrderStatus::Completed));
    assert_eq!(harness.store.status_history(&id).await.unwrap(), history_before);
    assert_eq!(harness.drain().await, 0);
}

#[tokio::test]
async fn test_amount_mismatch_leaves_order_pending() {
    let mut harness = Harness::default();
    let id = OrderId::new("O1");
    harness.insert_order("O1", 10_000).await;
    harness.processor.succeed("pi_E", "O1", 9_999).await;

    let err = harness
        .gateway
        .confirm_intent(&"pi_E".into())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::AmountMismatch {
            expected: 10_000,
            actual: 9_999,
            ..
        }
    ));
    assert_eq!(harness.store.get_status(&id).await.unwrap(), Some(OrderStatus::Pending));
    assert!(harness.store.status_history(&id).await.unwrap().is_empty());
    assert_eq!(harness.drain().await, 0);
    assert!(harness.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn test_confirmation_after_cancel_is_rejected() {
    let mut harness = Harness::default();
    let id = OrderId::new("O1");
    harness.insert_order("O1", 10_000).await;
    harness
        .status
        .operator_transition(&id, OrderStatus::Cancelled, None, true)
        .await
        .unwrap();
    harness.processor.succeed("pi_late", "O1", 10_000).await;

    let err = harness
        .gateway
        .confirm_intent(&"pi_late".into())
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Status(StatusError::InvalidTransition(_))));
    assert_eq!(harness.store.get_status(&id).await.unwrap(), Some(OrderStatus::Cancelled));
    assert_eq!(harness.drain().await, 1);
    assert_eq!(harness.mailer.subjects().await, vec!["Your order has been cancelled"]);
}

#[tokio::test]
async fn test_unauthorized_operator_changes_nothing() {
    let mut harness = Harness::default();
    let id = OrderId::new("O1");
    harness.insert_order("O1", 10_000).await;

    let err = harness
        .status
        .operator_transition(&id, OrderStatus::Cancelled, Some("SHELF-1"), false)
        .await
        .unwrap_err();

    assert!(matches!(err, StatusError::Unauthorized));
    let order = harness.store.get_order(&id).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.tracking_reference(), None);
    assert_eq!(harness.drain().await, 0);
}

// =============================================================================
// Full lifecycle
// =============================================================================

#[tokio::test]
async fn test_checkout_to_pickup_lifecycle() {
    let mut harness = Harness::default();
    let mut roster = PersonRoster::new();
    roster
        .replace(vec![
            complete_person("adult", AgeGroup::Adult),
            complete_person("child", AgeGroup::Child),
        ])
        .unwrap();

    let session = harness.checkout.begin(&roster, customer()).await.unwrap();
    assert_eq!(session.amount_minor, 20_000);

    let created = harness.processor.created().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, 20_000);
    assert_eq!(created[0].1.order_id, session.order_id);

    let order = harness.store.get_order(&session.order_id).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.items().len(), 2);
    assert_eq!(order.payment_intent_id(), Some(&session.payment_intent_id));

    harness
        .processor
        .succeed(session.payment_intent_id.as_str(), session.order_id.as_str(), 20_000)
        .await;
    harness
        .gateway
        .confirm_intent(&session.payment_intent_id)
        .await
        .unwrap();
    harness
        .status
        .operator_transition(&session.order_id, OrderStatus::ReadyForPickup, Some("SHELF-7"), true)
        .await
        .unwrap();
    harness
        .status
        .operator_transition(&session.order_id, OrderStatus::Completed, None, true)
        .await
        .unwrap();
    assert_eq!(harness.drain().await, 3);

    assert_eq!(
        harness.mailer.subjects().await,
        vec![
            "Your order is being made",
            "Your order is ready for pickup",
            "Your order is complete",
        ]
    );
    let pickup = &harness.mailer.sent().await[1];
    assert_eq!(pickup.to, "ada@example.com");
    assert!(pickup.text_body.contains("SHELF-7"));

    let history = harness.store.status_history(&session.order_id).await.unwrap();
    let path: Vec<_> = history.iter().map(|change| change.to).collect();
    assert_eq!(
        path,
        vec![OrderStatus::Processing, OrderStatus::ReadyForPickup, OrderStatus::Completed]
    );
    assert_eq!(history[0].source, TransitionSource::Payment);
    assert_eq!(history[1].source, TransitionSource::Operator);
}

#[tokio::test]
async fn test_intent_confirmed_against_wrong_order_is_rejected() {
    let harness = Harness::default();
    let mut roster = PersonRoster::new();
    roster
        .replace(vec![complete_person("adult", AgeGroup::Adult)])
        .unwrap();
    let session = harness.checkout.begin(&roster, customer()).await.unwrap();

    // A different succeeded intent claiming the same order.
    harness
        .processor
        .succeed("pi_other", session.order_id.as_str(), 12_000)
        .await;

    let err = harness
        .gateway
        .confirm_intent(&"pi_other".into())
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::IntentMismatch { .. }));
    assert_eq!(
        harness.store.get_status(&session.order_id).await.unwrap(),
        Some(OrderStatus::Pending)
    );
}

#[tokio::test]
async fn test_processor_outage_leaves_order_pending_without_intent() {
    let harness = Harness::default();
    let mut roster = PersonRoster::new();
    roster
        .replace(vec![complete_person("adult", AgeGroup::Adult)])
        .unwrap();
    harness.processor.set_unavailable(true);

    let err = harness.checkout.begin(&roster, customer()).await.unwrap_err();

    assert!(matches!(err, CheckoutError::Payment(PaymentError::Processor(ref e)) if e.is_transient()));
    let summary = harness.store.summary().await.unwrap();
    assert_eq!(summary.total_orders, 1);
    assert_eq!(summary.count(OrderStatus::Pending), 1);
    let order = harness
        .store
        .get_order(&summary.recent[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_intent_id(), None);
}
