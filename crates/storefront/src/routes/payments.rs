//! Payment confirmation route.

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::instrument;

use atelier_core::PaymentIntentId;

use crate::error::Result;
use crate::routes::{Success, success};
use crate::services::payments::ConfirmOutcome;
use crate::state::AppState;

/// Reconcile a payment intent with its order.
///
/// Safe to call repeatedly: once the order has moved on, the answer is
/// `already_confirmed` and nothing else happens.
#[instrument(skip_all, fields(intent_id = %intent_id))]
pub async fn confirm(
    State(state): State<AppState>,
    Path(intent_id): Path<PaymentIntentId>,
) -> Result<Json<Success<ConfirmOutcome>>> {
    let outcome = state.payments().confirm_intent(&intent_id).await?;
    Ok(success(outcome))
}
