//! CLI command implementations.

pub mod jobs;
pub mod migrate;
pub mod report;

use locker_pickup_engine::config::ConfigError;
use locker_pickup_engine::db::RepositoryError;
use locker_pickup_engine::state::StateError;
use locker_pickup_engine::{AppState, EngineConfig, db};
use thiserror::Error;

/// Errors shared by the commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to build engine state: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Load the engine configuration and connect, the way the server does.
async fn engine_state() -> Result<AppState, CommandError> {
    let config = EngineConfig::from_env()?;

    tracing::info!("Connecting to engine database...");
    let pool = db::create_pool(&config.database_url).await?;

    Ok(AppState::new(config, pool)?)
}
