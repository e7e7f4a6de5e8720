//! Scheduled jobs: the expiry sweep and notification redelivery.
//!
//! Both are safe to run concurrently with the server and with each other.
//! Expiries go through the same transition path as provider events, and a
//! notification is claimed before it is sent.

use chrono::Utc;

use super::{CommandError, engine_state};

/// Expire ready parcels past their hold period.
pub async fn sweep_expired(dry_run: bool, limit: i64) -> Result<(), CommandError> {
    let state = engine_state().await?;
    let hold_period = state.config().pickup.hold_period;

    let report = state
        .lifecycle()
        .expire_overdue(Utc::now(), hold_period, limit, dry_run)
        .await?;

    #[allow(clippy::print_stdout)]
    {
        if dry_run {
            println!("{} order(s) past their hold period (dry run)", report.overdue);
        } else {
            println!(
                "{} overdue, {} expired, {} already moved on",
                report.overdue, report.expired, report.skipped
            );
        }
    }
    Ok(())
}

/// Deliver notifications that are pending, failed or stuck in `sending`.
pub async fn redeliver_notifications(limit: i64) -> Result<(), CommandError> {
    let state = engine_state().await?;
    let report = state.dispatcher().redeliver(limit).await?;

    #[allow(clippy::print_stdout)]
    {
        println!(
            "{} attempted, {} sent, {} failed",
            report.attempted, report.sent, report.failed
        );
    }
    Ok(())
}
