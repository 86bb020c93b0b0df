//! Notification commands.

use atelier_core::OrderId;
use atelier_storefront::db::NotificationOutcome;
use atelier_storefront::services::notifications;

use super::{CliError, dispatcher, order_store};

/// Re-send the email for the order's current status.
///
/// # Errors
///
/// Returns `Notification` for an unknown order, or a configuration or
/// database error. A failed send is recorded and reported, not returned.
pub async fn resend(order_id: &OrderId) -> Result<(), CliError> {
    let store = order_store().await?;
    let dispatcher = dispatcher()?;

    match notifications::resend(store.as_ref(), &dispatcher, order_id).await? {
        NotificationOutcome::Sent => tracing::info!(order_id = %order_id, "Notification sent"),
        NotificationOutcome::Skipped => {
            tracing::warn!(order_id = %order_id, "No template for current status, nothing sent");
        }
        NotificationOutcome::Failed(reason) => {
            tracing::error!(order_id = %order_id, reason = %reason, "Notification failed");
            return Err(CliError::Mail(reason));
        }
    }
    Ok(())
}
