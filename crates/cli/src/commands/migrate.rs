//! Database migration command.
//!
//! Migrations live in `crates/storefront/migrations/` and are embedded at
//! compile time.
//!
//! # Environment Variables
//!
//! - `ATELIER_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string

use super::{CliError, database_url};

/// Run all pending migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), CliError> {
    tracing::info!("Connecting to database...");
    let pool = atelier_storefront::db::create_pool(&database_url()?).await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    tracing::info!("Migrations complete");
    Ok(())
}
