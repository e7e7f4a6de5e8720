//! Order lifecycle: which events move an order, and the operations that feed
//! events in from inside the engine (merchant cancel, hold-period expiry).
//!
//! [`decide`] is the single transition table. Both store implementations call
//! it while holding the order lock, so the decision and its writes are one
//! unit of work. Notifications are delivered only after that unit commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use locker_pickup_core::{
    EventDisposition, EventSource, EventType, NotificationKind, OrderId, PickupStatus, Transition,
};

use crate::db::{PickupStore, RepositoryError};
use crate::models::NewLockerEvent;
use crate::services::notifications::NotificationDispatcher;

/// Which notifications the merchant wants sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPolicy {
    /// Send the "picked up" confirmation.
    pub picked_up: bool,
}

impl NotificationPolicy {
    /// Returns true if `kind` should produce an outbox row.
    #[must_use]
    pub const fn allows(self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::PickedUp => self.picked_up,
            NotificationKind::PickupReady | NotificationKind::Cancelled | NotificationKind::Expired => true,
        }
    }
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self { picked_up: true }
    }
}

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Applied { from: PickupStatus, to: PickupStatus },
    AlreadyApplied,
    Terminal,
    UnknownType,
    Duplicate,
    Unmatched,
}

impl EventOutcome {
    /// Disposition recorded in the event log.
    #[must_use]
    pub const fn disposition(self) -> EventDisposition {
        match self {
            Self::Applied { .. } => EventDisposition::Applied,
            Self::AlreadyApplied => EventDisposition::AlreadyApplied,
            Self::Terminal => EventDisposition::Terminal,
            Self::UnknownType => EventDisposition::UnknownType,
            Self::Duplicate => EventDisposition::Duplicate,
            Self::Unmatched => EventDisposition::Unmatched,
        }
    }

    /// Returns true if the order changed status.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// The result of offering an event to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub outcome: EventOutcome,
    /// Outbox row to insert with the transition.
    pub notification: Option<NotificationKind>,
}

impl Decision {
    const fn without_notification(outcome: EventOutcome) -> Self {
        Self {
            outcome,
            notification: None,
        }
    }

    /// Decision for an event already seen for this order.
    #[must_use]
    pub const fn duplicate() -> Self {
        Self::without_notification(EventOutcome::Duplicate)
    }

    /// Decision for an event with no order.
    #[must_use]
    pub const fn unmatched() -> Self {
        Self::without_notification(EventOutcome::Unmatched)
    }
}

/// Decide what an event does to an order in `current` status.
#[must_use]
pub fn decide(current: PickupStatus, event: &EventType, policy: NotificationPolicy) -> Decision {
    let Some(target) = event.target_status() else {
        return Decision::without_notification(EventOutcome::UnknownType);
    };

    match current.transition_to(target) {
        Transition::Apply { from, to } => Decision {
            outcome: EventOutcome::Applied { from, to },
            notification: to.notification_on_entry().filter(|kind| policy.allows(*kind)),
        },
        Transition::AlreadyApplied => Decision::without_notification(EventOutcome::AlreadyApplied),
        Transition::Terminal => Decision::without_notification(EventOutcome::Terminal),
    }
}

/// Column changes written with an applied transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: PickupStatus,
    pub ready_at: Option<DateTime<Utc>>,
    pub pickup_request_id: Option<String>,
    pub pickup_link: Option<String>,
}

impl StatusChange {
    /// Changes for moving to `to` because of `event`, applied at `now`.
    ///
    /// Only `ready_for_pickup` carries data beyond the status: the hold clock
    /// starts and the pickup request and link are stored.
    #[must_use]
    pub fn for_transition(to: PickupStatus, event: &NewLockerEvent, now: DateTime<Utc>) -> Self {
        if to == PickupStatus::ReadyForPickup {
            Self {
                status: to,
                ready_at: Some(now),
                pickup_request_id: event.pickup_request_id.clone(),
                pickup_link: event.access_link.clone(),
            }
        } else {
            Self {
                status: to,
                ready_at: None,
                pickup_request_id: None,
                pickup_link: None,
            }
        }
    }
}

/// Errors from merchant-initiated lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),
}

/// Summary of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Orders past their hold deadline.
    pub overdue: usize,
    /// Orders moved to `expired` by this run.
    pub expired: usize,
    /// Orders that another writer moved first.
    pub skipped: usize,
}

/// Applies events to orders and hands committed notifications to the dispatcher.
#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn PickupStore>,
    dispatcher: NotificationDispatcher,
    policy: NotificationPolicy,
}

impl LifecycleService {
    #[must_use]
    pub fn new(
        store: Arc<dyn PickupStore>,
        dispatcher: NotificationDispatcher,
        policy: NotificationPolicy,
    ) -> Self {
        Self {
            store,
            dispatcher,
            policy,
        }
    }

    /// Record an event and apply its transition, then deliver any
    /// notification it produced.
    ///
    /// Delivery happens after the transition has committed and never fails
    /// this call.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the event could not be recorded. Nothing
    /// is written in that case.
    #[instrument(skip(self, event), fields(order_id = ?event.order_id, event_type = %event.event_type))]
    pub async fn apply(&self, event: NewLockerEvent) -> Result<EventOutcome, RepositoryError> {
        let recorded = self.store.record_event(event, self.policy).await?;

        tracing::info!(
            event_id = %recorded.event.id,
            outcome = ?recorded.outcome,
            "Locker event recorded"
        );

        if let Some(notification_id) = recorded.notification {
            self.dispatcher.deliver(notification_id).await;
        }

        Ok(recorded.outcome)
    }

    /// Cancel an order on the merchant's behalf.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::OrderNotFound` for an unknown order.
    pub async fn cancel(&self, order_id: OrderId) -> Result<EventOutcome, LifecycleError> {
        if self.store.order(order_id).await?.is_none() {
            return Err(LifecycleError::OrderNotFound(order_id));
        }

        let event = NewLockerEvent::internal(order_id, EventType::Cancelled, EventSource::Merchant);
        Ok(self.apply(event).await?)
    }

    /// Expire every ready order whose hold period ended before `now`.
    ///
    /// Each expiry goes through [`Self::apply`], so an order collected or
    /// cancelled since it was listed is left alone. With `dry_run` nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if listing or recording fails. Orders expired
    /// before the failure stay expired.
    #[instrument(skip(self))]
    pub async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
        hold_period: chrono::Duration,
        limit: i64,
        dry_run: bool,
    ) -> Result<SweepReport, RepositoryError> {
        let overdue = self.store.overdue_orders(now - hold_period, limit).await?;
        let mut report = SweepReport {
            overdue: overdue.len(),
            ..SweepReport::default()
        };

        if dry_run {
            for order in &overdue {
                tracing::info!(order_id = %order.id, ready_at = ?order.ready_at, "Would expire order");
            }
            return Ok(report);
        }

        for order in overdue {
            let event = NewLockerEvent::internal(order.id, EventType::Expired, EventSource::Sweep);
            if self.apply(event).await?.is_applied() {
                report.expired += 1;
            } else {
                report.skipped += 1;
            }
        }

        tracing::info!(
            overdue = report.overdue,
            expired = report.expired,
            skipped = report.skipped,
            "Expiry sweep finished"
        );
        Ok(report)
    }
}
