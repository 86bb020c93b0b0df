//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ATELIER_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `ATELIER_BASE_URL` - Public URL for the storefront
//! - `ATELIER_OPERATOR_TOKEN` - Bearer token for operator endpoints (min 32 chars, high entropy)
//! - `STRIPE_SECRET_KEY` - Payment processor secret key
//! - `STRIPE_WEBHOOK_SECRET` - Payment webhook signing secret
//! - `SMTP_HOST` - SMTP relay hostname
//! - `SMTP_USERNAME` - SMTP username
//! - `SMTP_PASSWORD` - SMTP password
//! - `EMAIL_FROM_ADDRESS` - Sender address for order notifications
//!
//! ## Optional
//! - `ATELIER_HOST` - Bind address (default: 127.0.0.1)
//! - `ATELIER_PORT` - Listen port (default: 3000)
//! - `ATELIER_CURRENCY` - Order currency (default: USD)
//! - `STRIPE_API_BASE` - Payment API base URL (default: <https://api.stripe.com>)
//! - `STRIPE_TIMEOUT_SECS` - Payment API request timeout (default: 15)
//! - `SMTP_PORT` - SMTP port (default: 587)
//! - `PRICE_ADULT` - Adult garment price (default: 120.00)
//! - `PRICE_CHILD` - Child garment price (default: 80.00)
//! - `PRICE_CUSTOM_FIT_SURCHARGE` - Custom-fit surcharge (default: 25.00)
//! - `ATELIER_TAX_RATE` - Sales tax fraction, e.g. 0.0825 (default: none)
//! - `NOTIFICATION_QUEUE_CAPACITY` - Pending notification events (default: 256)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Traces sample rate (default: 0.1)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use atelier_core::{CurrencyCode, PriceSchedule};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const MIN_OPERATOR_TOKEN_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: Url,
    /// Bearer token that authorizes operator status changes
    pub operator_token: SecretString,
    /// Payment processor configuration
    pub payments: PaymentConfig,
    /// Outgoing mail configuration
    pub email: EmailConfig,
    /// Garment price list
    pub pricing: PriceSchedule,
    /// Capacity of the notification event queue
    pub notification_queue_capacity: usize,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Payment processor configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaymentConfig {
    /// Secret API key (server-side only)
    pub secret_key: SecretString,
    /// Webhook endpoint signing secret
    pub webhook_secret: SecretString,
    /// API base URL (overridable for tests and mocks)
    pub api_base: Url,
    /// Currency charged for orders
    pub currency: CurrencyCode,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_base", &self.api_base.as_str())
            .field("currency", &self.currency)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// SMTP configuration for order notifications.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct EmailConfig {
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP server port
    pub smtp_port: u16,
    /// SMTP authentication username
    pub smtp_username: String,
    /// SMTP authentication password
    pub smtp_password: SecretString,
    /// Email sender address (From header)
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("ATELIER_DATABASE_URL")?;
        let host = parse_env_or_default::<IpAddr>("ATELIER_HOST", "127.0.0.1")?;
        let port = parse_env_or_default::<u16>("ATELIER_PORT", "3000")?;
        let base_url = parse_url("ATELIER_BASE_URL", &get_required_env("ATELIER_BASE_URL")?)?;
        let operator_token = get_validated_secret("ATELIER_OPERATOR_TOKEN")?;
        validate_min_length(&operator_token, "ATELIER_OPERATOR_TOKEN")?;

        let payments = PaymentConfig::from_env()?;
        let email = EmailConfig::from_env()?;
        let pricing = pricing_from_env(payments.currency)?;
        let notification_queue_capacity =
            parse_env_or_default::<usize>("NOTIFICATION_QUEUE_CAPACITY", "256")?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            operator_token,
            payments,
            email,
            pricing,
            notification_queue_capacity,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_env_or_default::<f32>("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: parse_env_or_default::<f32>(
                "SENTRY_TRACES_SAMPLE_RATE",
                "0.1",
            )?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether cookies should carry the `Secure` flag.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.base_url.scheme() == "https"
    }
}

impl PaymentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let currency = get_env_or_default("ATELIER_CURRENCY", "USD");
        let currency = CurrencyCode::from_str(&currency)
            .map_err(|e| ConfigError::InvalidEnvVar("ATELIER_CURRENCY".to_string(), e.to_string()))?;
        let api_base = parse_url(
            "STRIPE_API_BASE",
            &get_env_or_default("STRIPE_API_BASE", "https://api.stripe.com"),
        )?;
        let timeout_secs = parse_env_or_default::<u64>("STRIPE_TIMEOUT_SECS", "15")?;

        Ok(Self {
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
            api_base,
            currency,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl EmailConfig {
    /// Load SMTP settings on their own (the CLI sends mail without the rest
    /// of the storefront configuration).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            smtp_host: get_required_env("SMTP_HOST")?,
            smtp_port: parse_env_or_default::<u16>("SMTP_PORT", "587")?,
            smtp_username: get_required_env("SMTP_USERNAME")?,
            smtp_password: get_required_secret("SMTP_PASSWORD")?,
            from_address: get_required_env("EMAIL_FROM_ADDRESS")?,
        })
    }
}

/// Build the price list from `PRICE_*` and `ATELIER_TAX_RATE`.
fn pricing_from_env(currency: CurrencyCode) -> Result<PriceSchedule, ConfigError> {
    let defaults = PriceSchedule::default();
    let tax_rate = get_optional_env("ATELIER_TAX_RATE")
        .map(|raw| parse_decimal("ATELIER_TAX_RATE", &raw))
        .transpose()?;
    if let Some(rate) = tax_rate
        && (rate.is_sign_negative() || rate >= Decimal::ONE)
    {
        return Err(ConfigError::InvalidEnvVar(
            "ATELIER_TAX_RATE".to_string(),
            format!("must be a fraction in [0, 1), got {rate}"),
        ));
    }

    Ok(PriceSchedule {
        currency,
        adult: decimal_env_or("PRICE_ADULT", defaults.adult)?,
        child: decimal_env_or("PRICE_CHILD", defaults.child)?,
        custom_fit_surcharge: decimal_env_or(
            "PRICE_CUSTOM_FIT_SURCHARGE",
            defaults.custom_fit_surcharge,
        )?,
        tax_rate,
    })
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) with `FromStr`.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_decimal(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn decimal_env_or(key: &str, default: Decimal) -> Result<Decimal, ConfigError> {
    let value = match get_optional_env(key) {
        Some(raw) => parse_decimal(key, &raw)?,
        None => default,
    };
    if value.is_sign_negative() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "price cannot be negative".to_string(),
        ));
    }
    Ok(value)
}

/// Validate that a token meets minimum length requirements.
fn validate_min_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_OPERATOR_TOKEN_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_OPERATOR_TOKEN_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const OPERATOR_TOKEN: &str = "op_7Hq2xVr9LmZ4tKw8PbN3cYs6FjD1gRe5";
    pub(crate) const WEBHOOK_SECRET: &str = "whsec_super_secret_value";

    fn payment_config() -> PaymentConfig {
        PaymentConfig {
            secret_key: SecretString::from("sk_test_super_secret_value"),
            webhook_secret: SecretString::from(WEBHOOK_SECRET),
            api_base: Url::parse("https://api.stripe.com").unwrap(),
            currency: CurrencyCode::USD,
            timeout: Duration::from_secs(15),
        }
    }

    /// A complete configuration with local endpoints.
    pub(crate) fn test_config() -> StorefrontConfig {
        StorefrontConfig {
            database_url: SecretString::from("postgres://localhost/atelier_test"),
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            base_url: Url::parse("http://localhost:3000").unwrap(),
            operator_token: SecretString::from(OPERATOR_TOKEN),
            payments: payment_config(),
            email: EmailConfig {
                smtp_host: "localhost".to_string(),
                smtp_port: 1025,
                smtp_username: "orders".to_string(),
                smtp_password: SecretString::from("smtp-password"),
                from_address: "orders@atelier.test".to_string(),
            },
            pricing: PriceSchedule::default(),
            notification_queue_capacity: 16,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
        }
    }

    #[test]
    fn test_is_https() {
        let mut config = test_config();
        assert!(!config.is_https());
        config.base_url = Url::parse("https://atelier.example").unwrap();
        assert!(config.is_https());
    }

    #[test]
    fn test_shannon_entropy_empty_and_uniform() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-operator-token", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        assert!(validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR").is_ok());
    }

    #[test]
    fn test_operator_token_min_length() {
        assert!(validate_min_length(&SecretString::from("short"), "TOKEN").is_err());
        assert!(validate_min_length(&SecretString::from("k".repeat(32)), "TOKEN").is_ok());
    }

    #[test]
    fn test_parse_decimal_reports_key() {
        let err = parse_decimal("PRICE_ADULT", "12,00").unwrap_err();
        assert!(err.to_string().contains("PRICE_ADULT"));
        assert_eq!(parse_decimal("PRICE_ADULT", " 99.50 ").unwrap(), Decimal::new(9950, 2));
    }

    #[test]
    fn test_payment_config_debug_redacts_secrets() {
        let debug_output = format!("{:?}", payment_config());
        assert!(debug_output.contains("[REDACTED]"));
        assert!(debug_output.contains("api.stripe.com"));
        assert!(!debug_output.contains("super_secret"));
    }

    #[test]
    fn test_email_config_debug_redacts_password() {
        let config = EmailConfig {
            smtp_host: "smtp.mailhost.test".to_string(),
            smtp_port: 587,
            smtp_username: "orders".to_string(),
            smtp_password: SecretString::from("hunter2-smtp"),
            from_address: "orders@atelier.test".to_string(),
        };
        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("smtp.mailhost.test"));
        assert!(!debug_output.contains("hunter2-smtp"));
    }
}
