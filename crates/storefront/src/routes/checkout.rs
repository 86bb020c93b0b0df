//! Checkout route.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use atelier_core::{Customer, Email};

use crate::error::{AppError, Result, add_breadcrumb};
use crate::routes::roster::{clear_roster, load_roster};
use crate::routes::{Success, success};
use crate::services::checkout::CheckoutSession;
use crate::state::AppState;

/// Contact details submitted at checkout.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub name: String,
    pub email: String,
}

/// Price the session's roster, create the order and its payment intent.
///
/// The roster is cleared once the order exists; the payer completes payment
/// with the returned client secret.
#[instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Success<CheckoutSession>>)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".to_owned()));
    }
    let email = Email::parse(&body.email).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let customer = Customer {
        name: name.to_owned(),
        email,
    };

    let roster = load_roster(&session).await;
    let checkout = state.checkout().begin(&roster, customer).await?;

    add_breadcrumb(
        "checkout",
        "Order created",
        Some(&[("order_id", checkout.order_id.as_str())]),
    );
    clear_roster(&session).await;

    Ok((StatusCode::CREATED, success(checkout)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::{StatusCode, header};
    use serde_json::json;
    use tower::ServiceExt;

    use atelier_core::{OrderId, OrderStatus};

    use crate::db::OrderStore;
    use crate::routes::tests::{body_json, json_request, test_app};

    #[tokio::test]
    async fn test_checkout_with_empty_roster_is_not_ready() {
        let app = test_app();
        let response = app
            .router
            .oneshot(json_request(
                "POST",
                "/api/checkout",
                &json!({"name": "Grace Hopper", "email": "grace@example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "ROSTER_NOT_READY");
        assert!(app.processor.created.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkout_creates_pending_order_and_clears_roster() {
        let app = test_app();
        let put = app
            .router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/roster",
                &json!({"people": [{"id": "p1", "name": "Ada", "gender": "women",
                    "ageGroup": "child", "designId": "d-1", "size": "S"}]}),
            ))
            .await
            .unwrap();
        let cookie = put.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_owned();

        let mut request = json_request(
            "POST",
            "/api/checkout",
            &json!({"name": "Grace Hopper", "email": "grace@example.com"}),
        );
        request
            .headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["amountMinor"], 8000);

        let order_id = OrderId::new(body["orderId"].as_str().unwrap());
        let order = app.store.get_order(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);

        let mut show = axum::http::Request::builder()
            .uri("/api/roster")
            .body(axum::body::Body::empty())
            .unwrap();
        show.headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let body = body_json(app.router.oneshot(show).await.unwrap()).await;
        assert_eq!(body["people"], json!([]));
    }

    #[tokio::test]
    async fn test_invalid_email_is_bad_request() {
        let app = test_app();
        let response = app
            .router
            .oneshot(json_request(
                "POST",
                "/api/checkout",
                &json!({"name": "Grace", "email": "not-an-email"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
