//! Payment intents and their reconciliation with order status.
//!
//! [`PaymentProcessor`] is the narrow contract the storefront needs from a
//! processor; [`StripeClient`] implements it over the Stripe REST API.
//! [`PaymentGateway`] ties intents to orders: it creates the intent for an
//! order's total and, on confirmation, checks the processor's amount and
//! currency against the stored order before asking the status machine for
//! `PENDING -> PROCESSING`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use atelier_core::{CurrencyCode, Email, Money, MoneyError, OrderId, OrderStatus, PaymentIntentId, TransitionSource};

use crate::config::PaymentConfig;
use crate::db::{OrderStore, RepositoryError};
use crate::services::status::{OrderStatusMachine, StatusError, Transition};

/// Seconds a webhook timestamp may differ from the local clock.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Event type that confirms a payment.
pub const PAYMENT_SUCCEEDED_EVENT: &str = "payment_intent.succeeded";

// =============================================================================
// Processor contract
// =============================================================================

/// Errors talking to the payment processor.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Network failure, timeout, rate limit or 5xx. Safe to retry later.
    #[error("payment processor unavailable: {0}")]
    Transient(String),

    /// The processor refused the request (4xx other than 429).
    #[error("payment processor rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The processor answered with something we could not read.
    #[error("unexpected payment processor response: {0}")]
    Malformed(String),
}

impl ProcessorError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Intent status as reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    Other(String),
}

impl IntentStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Other(other) => other,
        }
    }
}

impl From<&str> for IntentStatus {
    fn from(s: &str) -> Self {
        match s {
            "requires_payment_method" => Self::RequiresPaymentMethod,
            "requires_confirmation" => Self::RequiresConfirmation,
            "requires_action" => Self::RequiresAction,
            "processing" => Self::Processing,
            "requires_capture" => Self::RequiresCapture,
            "canceled" => Self::Canceled,
            "succeeded" => Self::Succeeded,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to every intent so it can be traced back to its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentMetadata {
    pub order_id: OrderId,
    pub customer_email: Email,
}

impl IntentMetadata {
    pub const ORDER_ID_KEY: &'static str = "order_id";
    pub const CUSTOMER_EMAIL_KEY: &'static str = "customer_email";

    /// Idempotency key for creating this order's intent.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        format!("intent-{}", self.order_id)
    }
}

/// A freshly created intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIntent {
    pub id: PaymentIntentId,
    /// Handed to the payer's client to complete payment out of band.
    pub client_secret: String,
}

/// An intent as the processor currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedIntent {
    pub id: PaymentIntentId,
    pub status: IntentStatus,
    /// Amount in minor units.
    pub amount: i64,
    /// Lower-case ISO code (`usd`).
    pub currency: String,
    pub metadata: HashMap<String, String>,
}

impl RetrievedIntent {
    /// Order id from the metadata, if present.
    #[must_use]
    pub fn order_id(&self) -> Option<OrderId> {
        self.metadata
            .get(IntentMetadata::ORDER_ID_KEY)
            .filter(|id| !id.is_empty())
            .map(|id| OrderId::new(id.as_str()))
    }
}

/// The part of a payment processor the storefront uses.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create an intent for `amount_minor` in `currency`.
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: CurrencyCode,
        metadata: &IntentMetadata,
    ) -> Result<CreatedIntent, ProcessorError>;

    /// Fetch an intent's current state.
    async fn retrieve_intent(&self, intent_id: &PaymentIntentId) -> Result<RetrievedIntent, ProcessorError>;
}

// =============================================================================
// Stripe
// =============================================================================

/// Stripe REST client.
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
    api_base: Url,
    secret_key: SecretString,
}

/// Payment intent object as returned by Stripe.
#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError::Malformed` if the HTTP client cannot be built.
    pub fn new(config: &PaymentConfig) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProcessorError::Malformed(format!("http client: {e}")))?;

        Ok(Self {
            inner: Arc::new(StripeClientInner {
                client,
                api_base: config.api_base.clone(),
                secret_key: config.secret_key.clone(),
            }),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProcessorError> {
        let mut url = self.inner.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| ProcessorError::Malformed("api base cannot be a base URL".to_owned()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request and decode an intent, classifying failures.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<StripeIntent, ProcessorError> {
        let response = request
            .bearer_auth(self.inner.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| ProcessorError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProcessorError::Transient(e.to_string()))?;

        if !status.is_success() {
            let error = classify_failure(status.as_u16(), &body);
            tracing::error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Payment processor returned non-success status"
            );
            return Err(error);
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse payment intent");
            ProcessorError::Malformed(e.to_string())
        })
    }
}

/// Map a non-success HTTP status to a processor error.
fn classify_failure(status: u16, body: &str) -> ProcessorError {
    let message = serde_json::from_str::<StripeErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| format!("HTTP {status}"));

    if status == 429 || status >= 500 {
        ProcessorError::Transient(message)
    } else {
        ProcessorError::Rejected { status, message }
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[instrument(skip_all, fields(order_id = %metadata.order_id, amount_minor))]
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: CurrencyCode,
        metadata: &IntentMetadata,
    ) -> Result<CreatedIntent, ProcessorError> {
        let url = self.endpoint(&["v1", "payment_intents"])?;
        let form = [
            ("amount", amount_minor.to_string()),
            ("currency", currency.processor_code().to_owned()),
            ("automatic_payment_methods[enabled]", "true".to_owned()),
            ("receipt_email", metadata.customer_email.to_string()),
            (
                "metadata[order_id]",
                metadata.order_id.to_string(),
            ),
            (
                "metadata[customer_email]",
                metadata.customer_email.to_string(),
            ),
        ];

        let request = self
            .inner
            .client
            .post(url)
            .header("Idempotency-Key", metadata.idempotency_key())
            .form(&form);

        let intent = self.execute(request).await?;
        let client_secret = intent
            .client_secret
            .ok_or_else(|| ProcessorError::Malformed("intent has no client_secret".to_owned()))?;

        debug!(intent_id = %intent.id, "Payment intent created");
        Ok(CreatedIntent {
            id: PaymentIntentId::new(intent.id),
            client_secret,
        })
    }

    #[instrument(skip_all, fields(intent_id = %intent_id))]
    async fn retrieve_intent(&self, intent_id: &PaymentIntentId) -> Result<RetrievedIntent, ProcessorError> {
        let url = self.endpoint(&["v1", "payment_intents", intent_id.as_str()])?;
        let intent = self.execute(self.inner.client.get(url)).await?;

        Ok(RetrievedIntent {
            id: PaymentIntentId::new(intent.id),
            status: IntentStatus::from(intent.status.as_str()),
            amount: intent.amount,
            currency: intent.currency,
            metadata: intent.metadata,
        })
    }
}

// =============================================================================
// Webhooks
// =============================================================================

/// A webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Intent id for `payment_intent.*` events.
    #[must_use]
    pub fn intent_id(&self) -> Option<PaymentIntentId> {
        if !self.event_type.starts_with("payment_intent.") {
            return None;
        }
        self.data
            .object
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(PaymentIntentId::from)
    }
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex hmac>[,v1=...]`).
///
/// The signed payload is `"<t>.<body>"`, HMAC-SHA256 with the endpoint secret.
///
/// # Errors
///
/// Returns `PaymentError::InvalidSignature` for a malformed header, a
/// timestamp outside [`WEBHOOK_TOLERANCE_SECS`], or no matching signature.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &SecretString,
    now: i64,
) -> Result<(), PaymentError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(PaymentError::InvalidSignature("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(PaymentError::InvalidSignature("missing v1 signature"));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| PaymentError::InvalidSignature("invalid timestamp"))?;
    if (now - ts).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err(PaymentError::InvalidSignature("timestamp outside tolerance"));
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| PaymentError::InvalidSignature("invalid signing secret"))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if signatures
        .iter()
        .any(|candidate| constant_time_compare(&expected, candidate))
    {
        debug!("Webhook signature verified");
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature("signature mismatch"))
    }
}

/// Constant-time string comparison to prevent timing attacks.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

// =============================================================================
// Gateway
// =============================================================================

/// Errors from payment reconciliation.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// The intent has not succeeded yet.
    #[error("payment {intent_id} is not completed (status {status})")]
    NotCompleted {
        intent_id: PaymentIntentId,
        status: IntentStatus,
    },

    /// The processor's amount disagrees with the order total.
    #[error("payment amount {actual} does not match order {order_id} total {expected}")]
    AmountMismatch {
        order_id: OrderId,
        expected: i64,
        actual: i64,
    },

    /// The processor charged a different currency than the order's.
    #[error("payment currency {actual} does not match order {order_id} currency {expected}")]
    CurrencyMismatch {
        order_id: OrderId,
        expected: CurrencyCode,
        actual: String,
    },

    /// The intent carries no order id.
    #[error("payment {0} has no order id in its metadata")]
    MissingOrderId(PaymentIntentId),

    /// The intent is not the one attached to its order.
    #[error("payment {intent_id} does not belong to order {order_id}")]
    IntentMismatch {
        order_id: OrderId,
        intent_id: PaymentIntentId,
    },

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("invalid webhook signature: {0}")]
    InvalidSignature(&'static str),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Result of a successful confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    /// This call moved the order to `PROCESSING`.
    Confirmed { transition: Transition },
    /// The order had already moved on; nothing changed and nothing was sent.
    AlreadyConfirmed {
        order_id: OrderId,
        status: OrderStatus,
    },
}

/// Creates intents for orders and reconciles confirmed payments.
#[derive(Clone)]
pub struct PaymentGateway {
    processor: Arc<dyn PaymentProcessor>,
    store: Arc<dyn OrderStore>,
    status: OrderStatusMachine,
}

impl PaymentGateway {
    #[must_use]
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        store: Arc<dyn OrderStore>,
        status: OrderStatusMachine,
    ) -> Self {
        Self {
            processor,
            store,
            status,
        }
    }

    /// Request an intent for `amount`, tagged with the order and customer.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Money` if the amount cannot be expressed in
    /// minor units and `PaymentError::Processor` on processor failures.
    #[instrument(skip_all, fields(order_id = %order_id, amount = %amount))]
    pub async fn create_intent(
        &self,
        order_id: &OrderId,
        amount: &Money,
        customer_email: &Email,
    ) -> Result<CreatedIntent, PaymentError> {
        let amount_minor = amount.to_minor_units()?;
        let metadata = IntentMetadata {
            order_id: order_id.clone(),
            customer_email: customer_email.clone(),
        };
        let intent = self
            .processor
            .create_intent(amount_minor, amount.currency, &metadata)
            .await?;
        info!(intent_id = %intent.id, amount_minor, "Payment intent created");
        Ok(intent)
    }

    /// Reconcile an intent with its order.
    ///
    /// Only a `succeeded` intent whose amount and currency match the stored
    /// order can move it to `PROCESSING`. Replaying a confirmation once the
    /// order has moved on is `AlreadyConfirmed`.
    ///
    /// # Errors
    ///
    /// - `NotCompleted` if the intent has not succeeded
    /// - `AmountMismatch`/`CurrencyMismatch` if the charge disagrees with the order
    /// - `Status` if the transition is rejected (e.g. the order was cancelled)
    /// - `Processor`/`Repository` on infrastructure failures
    #[instrument(skip_all, fields(intent_id = %intent_id))]
    pub async fn confirm_intent(&self, intent_id: &PaymentIntentId) -> Result<ConfirmOutcome, PaymentError> {
        let intent = self.processor.retrieve_intent(intent_id).await?;

        if intent.status != IntentStatus::Succeeded {
            debug!(status = %intent.status, "Payment not completed");
            return Err(PaymentError::NotCompleted {
                intent_id: intent_id.clone(),
                status: intent.status,
            });
        }

        let order_id = intent
            .order_id()
            .ok_or_else(|| PaymentError::MissingOrderId(intent_id.clone()))?;
        let order = self
            .store
            .get_order(&order_id)
            .await?
            .ok_or_else(|| PaymentError::OrderNotFound(order_id.clone()))?;

        if let Some(attached) = order.payment_intent_id()
            && attached != intent_id
        {
            error!(order_id = %order_id, attached = %attached, "Payment intent does not belong to order");
            return Err(PaymentError::IntentMismatch {
                order_id,
                intent_id: intent_id.clone(),
            });
        }

        if !intent
            .currency
            .eq_ignore_ascii_case(order.currency().processor_code())
        {
            error!(
                order_id = %order_id,
                expected = %order.currency(),
                actual = %intent.currency,
                "Payment currency mismatch"
            );
            return Err(PaymentError::CurrencyMismatch {
                order_id,
                expected: order.currency(),
                actual: intent.currency,
            });
        }

        let expected = order.total().to_minor_units()?;
        if intent.amount != expected {
            error!(
                order_id = %order_id,
                expected,
                actual = intent.amount,
                charged = %Money::from_minor_units(intent.amount, order.currency()),
                "Payment amount mismatch"
            );
            return Err(PaymentError::AmountMismatch {
                order_id,
                expected,
                actual: intent.amount,
            });
        }

        if has_progressed(order.status()) {
            info!(order_id = %order_id, status = %order.status(), "Payment already confirmed");
            return Ok(ConfirmOutcome::AlreadyConfirmed {
                order_id,
                status: order.status(),
            });
        }

        match self
            .status
            .request_transition(&order_id, OrderStatus::Processing, TransitionSource::Payment)
            .await
        {
            Ok(transition) => Ok(ConfirmOutcome::Confirmed { transition }),
            Err(StatusError::Stale { actual, .. }) if has_progressed(actual) => {
                info!(order_id = %order_id, status = %actual, "Concurrent confirmation won");
                Ok(ConfirmOutcome::AlreadyConfirmed {
                    order_id,
                    status: actual,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Route a verified webhook event. Events other than
    /// `payment_intent.succeeded` are acknowledged and ignored.
    ///
    /// # Errors
    ///
    /// As [`confirm_intent`](Self::confirm_intent).
    #[instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<Option<ConfirmOutcome>, PaymentError> {
        if event.event_type != PAYMENT_SUCCEEDED_EVENT {
            debug!("Ignoring webhook event");
            return Ok(None);
        }
        let Some(intent_id) = event.intent_id() else {
            warn!("Webhook event has no payment intent id");
            return Ok(None);
        };
        self.confirm_intent(&intent_id).await.map(Some)
    }
}

/// `PROCESSING` or later on the forward path.
fn has_progressed(status: OrderStatus) -> bool {
    status.progress_rank() >= OrderStatus::Processing.progress_rank()
}
