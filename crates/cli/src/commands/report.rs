//! Reconciliation listings for operators.

use super::{CommandError, engine_state};

/// Print events that matched no order.
pub async fn unmatched_events(limit: i64) -> Result<(), CommandError> {
    let state = engine_state().await?;
    let events = state.store().unmatched_events(limit).await?;

    #[allow(clippy::print_stdout)]
    {
        if events.is_empty() {
            println!("No unmatched events");
        }
        for event in events {
            println!(
                "{}  {}  {}  delivery={}  locker={}/{}",
                event.id,
                event.received_at.format("%Y-%m-%d %H:%M:%S"),
                event.event_type,
                event.delivery_id.as_deref().unwrap_or("-"),
                event.tower_id.as_deref().unwrap_or("-"),
                event.locker_id.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(())
}

/// Print orders still waiting for a committed allocation.
pub async fn stuck_orders(limit: i64) -> Result<(), CommandError> {
    let state = engine_state().await?;
    let orders = state.store().stuck_orders(limit).await?;

    #[allow(clippy::print_stdout)]
    {
        if orders.is_empty() {
            println!("No stuck orders");
        }
        for order in orders {
            println!(
                "{}  {}  created {}  attempts={}  last error: {}",
                order.id,
                order.external_order_id,
                order.created_at.format("%Y-%m-%d %H:%M"),
                order.allocation_attempts,
                order.last_allocation_error.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(())
}
