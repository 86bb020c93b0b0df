//! Payment processor webhooks.
//!
//! Signature failures and transient errors are returned as errors so the
//! processor retries. Permanent rejections (an amount mismatch, a cancelled
//! order) are acknowledged with 200 because redelivery cannot change them;
//! they are logged, and the mismatch already alerted at `error`.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{AppError, ErrorKind, Result};
use crate::routes::{Success, success};
use crate::services::payments::{ConfirmOutcome, WebhookEvent, verify_webhook_signature};
use crate::state::AppState;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Acknowledgement body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<&'static str>,
}

/// Verify and handle a webhook delivery.
#[instrument(skip_all)]
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Success<WebhookAck>>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("missing signature header".to_owned()))?;

    verify_webhook_signature(
        &body,
        signature,
        &state.config().payments.webhook_secret,
        Utc::now().timestamp(),
    )
    .inspect_err(|e| warn!(error = %e, "Rejected webhook"))?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid event payload: {e}")))?;
    info!(event_id = %event.id, event_type = %event.event_type, "Webhook received");

    match state.payments().handle_event(&event).await {
        Ok(confirmation) => Ok(success(WebhookAck {
            received: true,
            confirmation,
            rejected: None,
        })),
        Err(e) => {
            let err = AppError::from(e);
            if err.kind() != ErrorKind::Rejected {
                return Err(err);
            }
            let (_, reason) = err.reason();
            warn!(event_id = %event.id, reason, error = %err, "Webhook event rejected");
            Ok(success(WebhookAck {
                received: true,
                confirmation: None,
                rejected: Some(reason),
            }))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::Utc;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use tower::ServiceExt;

    use atelier_core::{OrderId, OrderStatus};

    use super::SIGNATURE_HEADER;
    use crate::config::tests::WEBHOOK_SECRET;
    use crate::db::OrderStore;
    use crate::db::memory::tests::order;
    use crate::routes::tests::{body_json, test_app};

    fn signed(payload: &str, secret: &str) -> Request<Body> {
        let timestamp = Utc::now().timestamp();
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Request::builder()
            .method("POST")
            .uri("/webhooks/stripe")
            .header(SIGNATURE_HEADER, format!("t={timestamp},v1={signature}"))
            .body(Body::from(payload.to_owned()))
            .unwrap()
    }

    const SUCCEEDED: &str = r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;

    #[tokio::test]
    async fn test_signed_event_confirms_payment() {
        let app = test_app();
        app.store.insert_order(&order("O1", 10_000)).await.unwrap();
        app.processor.succeed("pi_1", "O1", 10_000).await;

        let response = app
            .router
            .oneshot(signed(SUCCEEDED, WEBHOOK_SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["confirmation"]["result"], "confirmed");
        assert_eq!(
            app.store.get_status(&OrderId::new("O1")).await.unwrap(),
            Some(OrderStatus::Processing)
        );
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let app = test_app();
        let response = app
            .router
            .oneshot(signed(SUCCEEDED, "whsec_wrong"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["reason"], "INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn test_mismatch_is_acknowledged_without_transition() {
        let app = test_app();
        app.store.insert_order(&order("O1", 10_000)).await.unwrap();
        app.processor.succeed("pi_1", "O1", 9_999).await;

        let response = app
            .router
            .oneshot(signed(SUCCEEDED, WEBHOOK_SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["rejected"], "PAYMENT_AMOUNT_MISMATCH");
        assert_eq!(
            app.store.get_status(&OrderId::new("O1")).await.unwrap(),
            Some(OrderStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let app = test_app();
        let payload = r#"{"id":"evt_2","type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
        let response = app
            .router
            .oneshot(signed(payload, WEBHOOK_SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["received"], true);
    }
}
