//! Operator API.
//!
//! Every handler takes [`OperatorAuthorization`]. Reads reject unauthorized
//! callers here; the status change hands the signal to the status machine.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use atelier_core::{Order, OrderId, OrderStatus};

use crate::db::{NotificationRecord, OrderSummary, StatusChange};
use crate::error::{AppError, Result};
use crate::middleware::OperatorAuthorization;
use crate::routes::{Success, success};
use crate::services::status::Transition;
use crate::state::AppState;

/// An order with its audit trail.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub order: Order,
    pub history: Vec<StatusChange>,
    pub notifications: Vec<NotificationRecord>,
}

/// Status change request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub tracking_reference: Option<String>,
}

fn require_operator(OperatorAuthorization(authorized): OperatorAuthorization) -> Result<()> {
    if authorized {
        Ok(())
    } else {
        Err(AppError::Unauthorized("operator token required".to_owned()))
    }
}

/// One order, its status history and notification log.
#[instrument(skip_all, fields(order_id = %order_id))]
pub async fn show_order(
    State(state): State<AppState>,
    auth: OperatorAuthorization,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Success<OrderDetail>>> {
    require_operator(auth)?;

    let store = state.store();
    let order = store
        .get_order(&order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))?;

    Ok(success(OrderDetail {
        order,
        history: store.status_history(&order_id).await?,
        notifications: store.notifications(&order_id).await?,
    }))
}

/// Operator-requested status transition.
#[instrument(skip_all, fields(order_id = %order_id, to = %body.status))]
pub async fn change_status(
    State(state): State<AppState>,
    OperatorAuthorization(authorized): OperatorAuthorization,
    Path(order_id): Path<OrderId>,
    Json(body): Json<StatusChangeRequest>,
) -> Result<Json<Success<Transition>>> {
    let transition = state
        .status()
        .operator_transition(
            &order_id,
            body.status,
            body.tracking_reference.as_deref(),
            authorized,
        )
        .await?;
    Ok(success(transition))
}

/// Counts per status, gross revenue and the most recent orders.
#[instrument(skip_all)]
pub async fn dashboard(
    State(state): State<AppState>,
    auth: OperatorAuthorization,
) -> Result<Json<Success<OrderSummary>>> {
    require_operator(auth)?;
    Ok(success(state.store().summary().await?))
}
