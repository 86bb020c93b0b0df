//! Order status notifications.
//!
//! Status writes commit first. The status machine then hands a
//! [`StatusChanged`] event to the [`NotificationQueue`]; the
//! [`NotificationWorker`] loads the order, renders the template for the new
//! status and sends it through a [`MailTransport`]. Every attempt is logged in
//! the order store as a [`NotificationRecord`], and a failed send never undoes
//! the transition that caused it.

use std::sync::Arc;

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use atelier_core::{Order, OrderId, OrderStatus};

use crate::config::EmailConfig;
use crate::db::{NotificationOutcome, NotificationRecord, OrderStore, RepositoryError};

// =============================================================================
// Templates
// =============================================================================

/// Fixed copy for one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTemplate {
    pub key: &'static str,
    pub subject: &'static str,
    pub heading: &'static str,
    pub message: &'static str,
}

const TEMPLATES: [StatusTemplate; 5] = [
    StatusTemplate {
        key: "PENDING",
        subject: "We received your order",
        heading: "Thank you for your order",
        message: "We have received your order and are waiting for payment to complete. \
                  We will let you know as soon as work begins.",
    },
    StatusTemplate {
        key: "PROCESSING",
        subject: "Your order is being made",
        heading: "Your garments are in the workshop",
        message: "Your payment is confirmed and our tailors have started on your order. \
                  Made-to-order pieces take a little time; we will write again when they are ready.",
    },
    StatusTemplate {
        key: "READY_FOR_PICKUP",
        subject: "Your order is ready for pickup",
        heading: "Ready when you are",
        message: "Your order is finished and waiting for you at the atelier. \
                  Bring this email or your order number when you visit.",
    },
    StatusTemplate {
        key: "COMPLETED",
        subject: "Your order is complete",
        heading: "Enjoy your new garments",
        message: "Your order has been collected and is now complete. \
                  Thank you for choosing made-to-order.",
    },
    StatusTemplate {
        key: "CANCELLED",
        subject: "Your order has been cancelled",
        heading: "Your order was cancelled",
        message: "Your order has been cancelled. If a payment was taken it will be refunded \
                  to the original payment method. Reply to this email if this is unexpected.",
    },
];

/// Template for a status key, or `None` for a key outside the five statuses.
#[must_use]
pub fn template_for_key(key: &str) -> Option<&'static StatusTemplate> {
    TEMPLATES.iter().find(|t| t.key == key)
}

/// HTML body for a status email.
#[derive(Template)]
#[template(path = "email/order_status.html")]
struct OrderStatusEmailHtml<'a> {
    subject: &'a str,
    heading: &'a str,
    message: &'a str,
    first_name: &'a str,
    order_id: &'a str,
    status_label: &'a str,
    total: &'a str,
    tracking_reference: Option<&'a str>,
}

/// Plain text body for a status email.
#[derive(Template)]
#[template(path = "email/order_status.txt")]
struct OrderStatusEmailText<'a> {
    heading: &'a str,
    message: &'a str,
    first_name: &'a str,
    order_id: &'a str,
    status_label: &'a str,
    total: &'a str,
    tracking_reference: Option<&'a str>,
}

// =============================================================================
// Mail transport
// =============================================================================

/// Errors from the mail transport.
#[derive(Debug, Error)]
pub enum MailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Transport could not be reached.
    #[error("Mail transport unavailable: {0}")]
    Unavailable(String),
}

/// A rendered email ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Something that delivers email.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

/// SMTP delivery over a STARTTLS relay.
#[derive(Clone)]
pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Create a new SMTP mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the relay hostname is invalid.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self { mailer })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let message = Message::builder()
            .from(
                email
                    .from
                    .parse()
                    .map_err(|_| MailError::InvalidAddress(email.from.clone()))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|_| MailError::InvalidAddress(email.to.clone()))?)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body),
                    ),
            )?;

        self.mailer.send(message).await?;

        info!(to = %email.to, subject = %email.subject, "Email sent successfully");
        Ok(())
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Errors delivering a notification.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("template error: {0}")]
    Template(#[from] askama::Error),

    #[error("mail error: {0}")]
    Mail(#[from] MailError),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("notification queue is full")]
    QueueFull,

    #[error("notification queue is closed")]
    QueueClosed,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Result of a dispatch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// No template for the status; nothing was sent.
    Skipped,
}

/// Renders status templates and sends them to the customer.
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
    from_address: String,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>, from_address: impl Into<String>) -> Self {
        Self {
            transport,
            from_address: from_address.into(),
        }
    }

    /// Send the email for `status`.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError` if rendering or sending fails.
    pub async fn dispatch(
        &self,
        order: &Order,
        status: OrderStatus,
    ) -> Result<DispatchOutcome, NotificationError> {
        self.dispatch_key(order, status.as_str()).await
    }

    /// Send the email for a raw status key. Unknown keys are skipped, not errors.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError` if rendering or sending fails.
    pub async fn dispatch_key(
        &self,
        order: &Order,
        status_key: &str,
    ) -> Result<DispatchOutcome, NotificationError> {
        let Some(template) = template_for_key(status_key) else {
            debug!(order_id = %order.id(), status_key, "No template for status, skipping");
            return Ok(DispatchOutcome::Skipped);
        };

        let email = self.render(order, template)?;
        self.transport.send(email).await?;
        Ok(DispatchOutcome::Sent)
    }

    /// Render the email for one template.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Template` if a template fails to render.
    pub fn render(
        &self,
        order: &Order,
        template: &StatusTemplate,
    ) -> Result<OutgoingEmail, NotificationError> {
        let status_label = template
            .key
            .parse::<OrderStatus>()
            .map_or(template.key, OrderStatus::label);
        let total = order.total().to_string();
        let customer = order.customer();

        let html = OrderStatusEmailHtml {
            subject: template.subject,
            heading: template.heading,
            message: template.message,
            first_name: customer.first_name(),
            order_id: order.id().as_str(),
            status_label,
            total: &total,
            tracking_reference: order.tracking_reference(),
        }
        .render()?;
        let text = OrderStatusEmailText {
            heading: template.heading,
            message: template.message,
            first_name: customer.first_name(),
            order_id: order.id().as_str(),
            status_label,
            total: &total,
            tracking_reference: order.tracking_reference(),
        }
        .render()?;

        Ok(OutgoingEmail {
            from: self.from_address.clone(),
            to: customer.email.to_string(),
            subject: template.subject.to_owned(),
            text_body: text,
            html_body: html,
        })
    }
}

// =============================================================================
// Queue and worker
// =============================================================================

/// An accepted status transition waiting to be announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChanged {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

/// Sending half of the notification queue.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<StatusChanged>,
}

impl NotificationQueue {
    /// A bounded queue and its receiving end.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatusChanged>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` or `QueueClosed`; the event is dropped.
    pub fn enqueue(&self, event: StatusChanged) -> Result<(), NotificationError> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(NotificationError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NotificationError::QueueClosed),
        }
    }
}

/// Load the order, dispatch, and record the outcome.
///
/// A failed send is recorded as `Failed` and returned as the outcome, not as
/// an error.
///
/// # Errors
///
/// Returns `OrderNotFound` for an unknown order and `Repository` if the order
/// cannot be loaded or the outcome cannot be recorded.
#[instrument(skip_all, fields(order_id = %order_id, status = status_key))]
pub async fn deliver(
    store: &dyn OrderStore,
    dispatcher: &NotificationDispatcher,
    order_id: &OrderId,
    status_key: &str,
) -> Result<NotificationOutcome, NotificationError> {
    let order = store
        .get_order(order_id)
        .await?
        .ok_or_else(|| NotificationError::OrderNotFound(order_id.clone()))?;

    let outcome = match dispatcher.dispatch_key(&order, status_key).await {
        Ok(DispatchOutcome::Sent) => {
            info!(status = status_key, "Status notification sent");
            NotificationOutcome::Sent
        }
        Ok(DispatchOutcome::Skipped) => NotificationOutcome::Skipped,
        Err(e) => {
            error!(status = status_key, error = %e, "Status notification failed");
            NotificationOutcome::Failed(e.to_string())
        }
    };

    store
        .record_notification(NotificationRecord::now(
            order_id.clone(),
            status_key,
            outcome.clone(),
        ))
        .await?;

    Ok(outcome)
}

/// Re-send the email for the order's current status.
///
/// # Errors
///
/// Returns `OrderNotFound` for an unknown order and `Repository` on store
/// failures.
pub async fn resend(
    store: &dyn OrderStore,
    dispatcher: &NotificationDispatcher,
    order_id: &OrderId,
) -> Result<NotificationOutcome, NotificationError> {
    let status = store
        .get_status(order_id)
        .await?
        .ok_or_else(|| NotificationError::OrderNotFound(order_id.clone()))?;
    deliver(store, dispatcher, order_id, status.as_str()).await
}

/// Consumes [`StatusChanged`] events.
pub struct NotificationWorker {
    receiver: mpsc::Receiver<StatusChanged>,
    store: Arc<dyn OrderStore>,
    dispatcher: NotificationDispatcher,
}

impl NotificationWorker {
    #[must_use]
    pub fn new(
        receiver: mpsc::Receiver<StatusChanged>,
        store: Arc<dyn OrderStore>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            receiver,
            store,
            dispatcher,
        }
    }

    /// Process events until every queue handle is dropped.
    pub async fn run(mut self) {
        info!("Notification worker started");
        while let Some(event) = self.receiver.recv().await {
            self.handle(&event).await;
        }
        info!("Notification worker stopped");
    }

    /// Process every event already queued, then return how many were handled.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.receiver.try_recv() {
            self.handle(&event).await;
            handled += 1;
        }
        handled
    }

    async fn handle(&self, event: &StatusChanged) {
        match deliver(
            self.store.as_ref(),
            &self.dispatcher,
            &event.order_id,
            event.status.as_str(),
        )
        .await
        {
            Ok(outcome) => debug!(order_id = %event.order_id, outcome = outcome.as_str(), "Notification handled"),
            Err(NotificationError::OrderNotFound(id)) => {
                warn!(order_id = %id, "Notification for unknown order dropped");
            }
            Err(e) => {
                error!(order_id = %event.order_id, status = %event.status, error = %e, "Failed to record notification");
            }
        }
    }
}
