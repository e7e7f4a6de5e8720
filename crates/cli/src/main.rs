//! Locker Pickup CLI - migrations and scheduled jobs.
//!
//! # Usage
//!
//! ```bash
//! # Run engine database migrations
//! lp-cli migrate
//!
//! # Expire parcels past their hold period (run from cron)
//! lp-cli sweep-expired
//! lp-cli sweep-expired --dry-run
//!
//! # Retry customer notifications that never went out
//! lp-cli notifications redeliver --limit 200
//!
//! # Reconciliation views
//! lp-cli events unmatched
//! lp-cli orders stuck
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "lp-cli")]
#[command(author, version, about = "Locker pickup CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run engine database migrations
    Migrate,
    /// Expire ready parcels whose hold period has ended
    SweepExpired {
        /// List overdue orders without changing them
        #[arg(long)]
        dry_run: bool,

        /// Maximum orders to process in one run
        #[arg(long, default_value_t = 500)]
        limit: i64,
    },
    /// Customer notification outbox
    Notifications {
        #[command(subcommand)]
        action: NotificationsAction,
    },
    /// Provider event log
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Pickup orders
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },
}

#[derive(Debug, Subcommand)]
enum NotificationsAction {
    /// Deliver notifications left pending or failed
    Redeliver {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum EventsAction {
    /// List events that matched no order, newest first
    Unmatched {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum OrdersAction {
    /// List orders still waiting for a committed allocation
    Stuck {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "locker_pickup_cli=info,locker_pickup_engine=info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::engine().await?,
        Commands::SweepExpired { dry_run, limit } => {
            commands::jobs::sweep_expired(dry_run, limit).await?;
        }
        Commands::Notifications { action } => match action {
            NotificationsAction::Redeliver { limit } => {
                commands::jobs::redeliver_notifications(limit).await?;
            }
        },
        Commands::Events { action } => match action {
            EventsAction::Unmatched { limit } => commands::report::unmatched_events(limit).await?,
        },
        Commands::Orders { action } => match action {
            OrdersAction::Stuck { limit } => commands::report::stuck_orders(limit).await?,
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_sweep_flags() {
        let cli = Cli::try_parse_from(["lp-cli", "sweep-expired", "--dry-run"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::SweepExpired {
                dry_run: true,
                limit: 500
            }
        ));
    }

    #[test]
    fn test_parses_nested_commands() {
        let cli = Cli::try_parse_from(["lp-cli", "notifications", "redeliver", "--limit", "10"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Notifications {
                action: NotificationsAction::Redeliver { limit: 10 }
            }
        ));

        let cli = Cli::try_parse_from(["lp-cli", "orders", "stuck"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Orders {
                action: OrdersAction::Stuck { limit: 50 }
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["lp-cli", "seed"]).is_err());
    }
}
