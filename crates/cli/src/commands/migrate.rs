//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! lp-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `ENGINE_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! Migrations live in `crates/engine/migrations/` and are embedded at build
//! time.

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;

use super::CommandError;
use locker_pickup_engine::config::ConfigError;

fn database_url() -> Result<SecretString, ConfigError> {
    std::env::var("ENGINE_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| ConfigError::MissingEnvVar("ENGINE_DATABASE_URL".to_string()))
}

/// Run engine database migrations.
pub async fn engine() -> Result<(), CommandError> {
    let database_url = database_url()?;

    tracing::info!("Connecting to engine database...");
    let pool = PgPool::connect(database_url.expose_secret()).await?;

    tracing::info!("Running engine migrations...");
    sqlx::migrate!("../engine/migrations").run(&pool).await?;

    tracing::info!("Engine migrations complete");
    Ok(())
}
