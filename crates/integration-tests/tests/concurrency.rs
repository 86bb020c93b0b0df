//! Concurrent writers against one order.
//!
//! Both races are settled by the store's compare-and-set: whichever writer
//! commits first wins, the loser is rejected, and exactly one notification
//! is queued per committed change.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use atelier_core::{OrderId, OrderStatus, TransitionSource, allowed_transition};
use atelier_integration_tests::Harness;
use atelier_storefront::db::OrderStore;
use atelier_storefront::services::payments::ConfirmOutcome;
use atelier_storefront::services::status::StatusError;

const ROUNDS: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirmations_transition_once() {
    for round in 0..ROUNDS {
        let mut harness = Harness::default();
        let order_id = format!("O{round}");
        let id = OrderId::new(order_id.as_str());
        harness.insert_order(&order_id, 10_000).await;
        harness.processor.succeed("pi_dup", &order_id, 10_000).await;

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let gateway = harness.gateway.clone();
                tokio::spawn(async move { gateway.confirm_intent(&"pi_dup".into()).await })
            })
            .collect();

        let mut confirmed = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                ConfirmOutcome::Confirmed { .. } => confirmed += 1,
                ConfirmOutcome::AlreadyConfirmed { status, .. } => {
                    assert_eq!(status, OrderStatus::Processing);
                }
            }
        }

        assert_eq!(confirmed, 1, "round {round}");
        assert_eq!(harness.store.status_history(&id).await.unwrap().len(), 1);
        assert_eq!(harness.drain().await, 1);
        assert_eq!(harness.mailer.sent().await.len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_operator_cancel_racing_payment_keeps_a_valid_history() {
    for round in 0..ROUNDS {
        let mut harness = Harness::default();
        let order_id = format!("O{round}");
        let id = OrderId::new(order_id.as_str());
        harness.insert_order(&order_id, 10_000).await;
        harness.processor.succeed("pi_race", &order_id, 10_000).await;

        let gateway = harness.gateway.clone();
        let payment = tokio::spawn(async move { gateway.confirm_intent(&"pi_race".into()).await });
        let status = harness.status.clone();
        let cancel_id = id.clone();
        let cancel = tokio::spawn(async move {
            status
                .operator_transition(&cancel_id, OrderStatus::Cancelled, None, true)
                .await
        });

        let payment = payment.await.unwrap();
        let cancel = cancel.await.unwrap();

        if let Err(e) = &cancel {
            assert!(
                matches!(e, StatusError::Stale { .. } | StatusError::InvalidTransition(_)),
                "round {round}: {e:?}"
            );
        }

        let history = harness.store.status_history(&id).await.unwrap();
        let mut current = OrderStatus::Pending;
        for change in &history {
            assert_eq!(change.from, current, "round {round}: history is not a chain");
            assert!(allowed_transition(change.from, change.to));
            current = change.to;
        }
        assert_eq!(harness.store.get_status(&id).await.unwrap(), Some(current));

        let payment_committed = history
            .iter()
            .any(|change| change.source == TransitionSource::Payment);
        assert_eq!(
            payment_committed,
            matches!(payment, Ok(ConfirmOutcome::Confirmed { .. })),
            "round {round}"
        );
        assert_eq!(
            history
                .iter()
                .any(|change| change.source == TransitionSource::Operator),
            cancel.is_ok(),
            "round {round}"
        );

        assert_eq!(harness.drain().await, history.len());
        assert_eq!(harness.mailer.sent().await.len(), history.len());
    }
}
