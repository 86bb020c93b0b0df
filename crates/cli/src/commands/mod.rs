//! CLI commands.

pub mod migrate;
pub mod notify;
pub mod order;

use std::sync::Arc;

use secrecy::SecretString;
use thiserror::Error;

use atelier_storefront::config::{ConfigError, EmailConfig};
use atelier_storefront::db::{self, PgOrderStore, RepositoryError};
use atelier_storefront::services::notifications::{NotificationDispatcher, NotificationError, SmtpMailer};
use atelier_storefront::services::status::StatusError;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Mail transport error: {0}")]
    Mail(String),

    #[error("Output error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database URL from `ATELIER_DATABASE_URL`, falling back to `DATABASE_URL`.
pub(crate) fn database_url() -> Result<SecretString, CliError> {
    let _ = dotenvy::dotenv();
    std::env::var("ATELIER_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CliError::MissingEnvVar("ATELIER_DATABASE_URL"))
}

/// Order store over a fresh pool.
pub(crate) async fn order_store() -> Result<Arc<PgOrderStore>, CliError> {
    let pool = db::create_pool(&database_url()?).await?;
    Ok(Arc::new(PgOrderStore::new(pool)))
}

/// Dispatcher over SMTP, configured from the environment.
pub(crate) fn dispatcher() -> Result<NotificationDispatcher, CliError> {
    let email = EmailConfig::from_env()?;
    let mailer = SmtpMailer::new(&email).map_err(|e| CliError::Mail(e.to_string()))?;
    Ok(NotificationDispatcher::new(Arc::new(mailer), email.from_address))
}
