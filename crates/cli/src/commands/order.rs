//! Order inspection and operator transitions.

use serde_json::json;

use atelier_core::{OrderId, OrderStatus};
use atelier_storefront::db::OrderStore;
use atelier_storefront::services::notifications::{NotificationQueue, NotificationWorker};
use atelier_storefront::services::status::OrderStatusMachine;

use super::{CliError, dispatcher, order_store};

/// Print the order, its status history and notification log.
///
/// # Errors
///
/// Returns `NotFound` for an unknown order, or a database error.
pub async fn show(order_id: &OrderId) -> Result<(), CliError> {
    let store = order_store().await?;
    let order = store
        .get_order(order_id)
        .await?
        .ok_or_else(|| CliError::NotFound(order_id.to_string()))?;

    let detail = json!({
        "order": order,
        "history": store.status_history(order_id).await?,
        "notifications": store.notifications(order_id).await?,
    });

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    }
    Ok(())
}

/// Operator transition. The status email is delivered before returning.
///
/// # Errors
///
/// Returns `Status` if the transition is rejected, or a configuration or
/// database error.
pub async fn transition(
    order_id: &OrderId,
    status: OrderStatus,
    tracking: Option<&str>,
) -> Result<(), CliError> {
    let store = order_store().await?;
    let dispatcher = dispatcher()?;
    let (queue, receiver) = NotificationQueue::channel(1);
    let mut worker = NotificationWorker::new(receiver, store.clone(), dispatcher);
    let machine = OrderStatusMachine::new(store, queue);

    let transition = machine
        .operator_transition(order_id, status, tracking, true)
        .await?;
    tracing::info!(
        order_id = %transition.order_id,
        from = %transition.from,
        to = %transition.to,
        "Order status changed"
    );

    let delivered = worker.drain().await;
    tracing::info!(delivered, "Notifications processed");
    Ok(())
}
