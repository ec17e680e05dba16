//! Storage-layer constraints.
//!
//! The hosted platform owns the data, but uniqueness keys, check constraints
//! and realtime settings live in the database itself. These migrations are
//! applied over a direct `PostgreSQL` connection.
//!
//! # Environment Variables
//!
//! - `SUPABASE_DB_URL` - `PostgreSQL` connection string for the project
//!
//! # Migration Files
//!
//! `crates/storefront/migrations/`

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use tracing::info;

use super::CommandError;

/// Apply every pending migration.
///
/// # Errors
///
/// Returns `CommandError` if `SUPABASE_DB_URL` is unset, the database is
/// unreachable, or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let database_url = std::env::var("SUPABASE_DB_URL")
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("SUPABASE_DB_URL"))?;

    info!("Connecting to database...");
    let pool = PgPool::connect(database_url.expose_secret()).await?;

    info!("Running migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    info!("Migrations complete!");
    Ok(())
}
