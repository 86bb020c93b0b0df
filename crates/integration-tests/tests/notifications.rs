//! Notification delivery: failures are recorded and never undo a transition.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use atelier_core::{OrderId, OrderStatus};
use atelier_integration_tests::{Harness, order};
use atelier_storefront::db::{NotificationOutcome, OrderStore};
use atelier_storefront::services::notifications::{self, DispatchOutcome, NotificationError};

#[tokio::test]
async fn test_failed_send_is_recorded_and_transition_stands() {
    let mut harness = Harness::default();
    let id = OrderId::new("O1");
    harness.insert_order("O1", 10_000).await;
    harness.processor.succeed("pi_1", "O1", 10_000).await;
    harness.mailer.set_failing(true);

    harness.gateway.confirm_intent(&"pi_1".into()).await.unwrap();
    assert_eq!(harness.drain().await, 1);

    assert_eq!(harness.store.get_status(&id).await.unwrap(), Some(OrderStatus::Processing));
    let records = harness.store.notifications(&id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status_key, "PROCESSING");
    assert!(matches!(
        records[0].outcome,
        NotificationOutcome::Failed(ref reason) if reason.contains("connection refused")
    ));
}

#[tokio::test]
async fn test_resend_after_failure_delivers_current_status() {
    let mut harness = Harness::default();
    let id = OrderId::new("O1");
    harness.insert_order("O1", 10_000).await;
    harness.mailer.set_failing(true);
    harness
        .status
        .operator_transition(&id, OrderStatus::Processing, None, true)
        .await
        .unwrap();
    harness.drain().await;

    harness.mailer.set_failing(false);
    let outcome = notifications::resend(harness.store.as_ref(), &harness.dispatcher, &id)
        .await
        .unwrap();

    assert_eq!(outcome, NotificationOutcome::Sent);
    assert_eq!(harness.mailer.subjects().await, vec!["Your order is being made"]);
    let outcomes: Vec<_> = harness
        .store
        .notifications(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.outcome.as_str())
        .collect();
    assert_eq!(outcomes, vec!["failed", "sent"]);
}

#[tokio::test]
async fn test_resend_for_unknown_order() {
    let harness = Harness::default();

    let err = notifications::resend(harness.store.as_ref(), &harness.dispatcher, &OrderId::new("missing"))
        .await
        .unwrap_err();

    assert!(matches!(err, NotificationError::OrderNotFound(_)));
}

#[tokio::test]
async fn test_unknown_status_key_is_skipped_silently() {
    let harness = Harness::default();
    let order = order("O1", 10_000);

    let outcome = harness
        .dispatcher
        .dispatch_key(&order, "SHIPPED")
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Skipped);
    assert!(harness.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn test_full_queue_records_failure_without_blocking() {
    let mut harness = Harness::with_queue_capacity(1);
    for id in ["O1", "O2"] {
        harness.insert_order(id, 10_000).await;
    }

    for id in ["O1", "O2"] {
        harness
            .status
            .operator_transition(&OrderId::new(id), OrderStatus::Processing, None, true)
            .await
            .unwrap();
    }

    // O2's event did not fit and was recorded as failed at once.
    let overflow = harness.store.notifications(&OrderId::new("O2")).await.unwrap();
    assert_eq!(overflow.len(), 1);
    assert!(matches!(overflow[0].outcome, NotificationOutcome::Failed(_)));
    assert_eq!(
        harness.store.get_status(&OrderId::new("O2")).await.unwrap(),
        Some(OrderStatus::Processing)
    );

    assert_eq!(harness.drain().await, 1);
    assert_eq!(harness.mailer.sent().await.len(), 1);
    assert!(harness.mailer.sent().await[0].text_body.contains("O1"));
}

#[tokio::test]
async fn test_tracking_reference_reaches_the_email() {
    let mut harness = Harness::default();
    let id = OrderId::new("O1");
    harness.insert_order("O1", 10_000).await;
    harness
        .status
        .operator_transition(&id, OrderStatus::Processing, None, true)
        .await
        .unwrap();
    harness
        .status
        .operator_transition(&id, OrderStatus::ReadyForPickup, Some("  SHELF-3 "), true)
        .await
        .unwrap();
    harness.drain().await;

    let order = harness.store.get_order(&id).await.unwrap().unwrap();
    assert_eq!(order.tracking_reference(), Some("SHELF-3"));
    let sent = harness.mailer.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent[1].html_body.contains("SHELF-3"));
    assert!(sent[1].text_body.contains("Ready for pickup"));
}
