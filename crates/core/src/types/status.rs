//! Pickup order status and the forward-only transition rule.
//!
//! ```text
//! pending_dropoff → dropped_off → ready_for_pickup → completed
//!        │               │               │
//!        └───────────────┴───────────────┴──→ cancelled | expired
//! ```
//!
//! `completed`, `cancelled` and `expired` are terminal. An event names a
//! target status; [`PickupStatus::transition_to`] decides whether the target
//! moves the order forward, is already reflected, or arrives too late.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pickup fulfillment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "pickup_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    /// Locker allocated (or awaiting allocation); parcel not yet in the locker.
    #[default]
    PendingDropoff,
    /// Merchant or courier placed the parcel in the locker.
    DroppedOff,
    /// Customer has been issued an access link and may collect.
    ReadyForPickup,
    /// Customer collected the parcel.
    Completed,
    /// Merchant or provider cancelled the pickup.
    Cancelled,
    /// Hold period elapsed without pickup.
    Expired,
}

/// Outcome of offering a target status to an order in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Target is forward of the current status; apply it.
    Apply {
        /// Status before the transition.
        from: PickupStatus,
        /// Status after the transition.
        to: PickupStatus,
    },
    /// Target is the current status or behind it. Nothing to do.
    AlreadyApplied,
    /// Order is in a terminal status and never changes again.
    Terminal,
}

impl Transition {
    /// Returns true if the transition mutates the order.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Apply { .. })
    }
}

impl PickupStatus {
    /// All statuses, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::PendingDropoff,
        Self::DroppedOff,
        Self::ReadyForPickup,
        Self::Completed,
        Self::Cancelled,
        Self::Expired,
    ];

    /// Position on the linear happy path, or `None` for the side branches.
    #[must_use]
    pub const fn rank(self) -> Option<u8> {
        match self {
            Self::PendingDropoff => Some(0),
            Self::DroppedOff => Some(1),
            Self::ReadyForPickup => Some(2),
            Self::Completed => Some(3),
            Self::Cancelled | Self::Expired => None,
        }
    }

    /// Returns true for statuses that never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Decide what happens when an event targeting `target` reaches an order
    /// currently in `self`.
    #[must_use]
    pub fn transition_to(self, target: Self) -> Transition {
        if self.is_terminal() {
            return Transition::Terminal;
        }

        let forward = match (self.rank(), target.rank()) {
            // Side branches are reachable from any non-terminal status.
            (_, None) => true,
            (Some(current), Some(next)) => next > current,
            // Non-terminal statuses always have a rank.
            (None, Some(_)) => false,
        };

        if forward {
            Transition::Apply {
                from: self,
                to: target,
            }
        } else {
            Transition::AlreadyApplied
        }
    }

    /// The customer notification owed when an order enters this status.
    #[must_use]
    pub const fn notification_on_entry(self) -> Option<NotificationKind> {
        match self {
            Self::PendingDropoff | Self::DroppedOff => None,
            Self::ReadyForPickup => Some(NotificationKind::PickupReady),
            Self::Completed => Some(NotificationKind::PickedUp),
            Self::Cancelled => Some(NotificationKind::Cancelled),
            Self::Expired => Some(NotificationKind::Expired),
        }
    }

    /// Wire/database name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingDropoff => "pending_dropoff",
            Self::DroppedOff => "dropped_off",
            Self::ReadyForPickup => "ready_for_pickup",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for PickupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PickupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid pickup status: {s}"))
    }
}

/// Customer-facing message owed for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "notification_kind", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PickupReady,
    PickedUp,
    Cancelled,
    Expired,
}

impl NotificationKind {
    /// Wire/database name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PickupReady => "pickup_ready",
            Self::PickedUp => "picked_up",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of an outbox notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "delivery_state", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Waiting for its first delivery attempt.
    #[default]
    Pending,
    /// Claimed by a dispatcher; delivery in progress.
    Sending,
    /// Delivered on at least one channel.
    Sent,
    /// Every channel failed; eligible for redelivery.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::PickupStatus::{Cancelled, Completed, DroppedOff, Expired, PendingDropoff, ReadyForPickup};

    #[test]
    fn test_forward_transitions_apply() {
        assert_eq!(
            PendingDropoff.transition_to(DroppedOff),
            Transition::Apply {
                from: PendingDropoff,
                to: DroppedOff
            }
        );
        assert!(DroppedOff.transition_to(ReadyForPickup).is_applied());
        assert!(ReadyForPickup.transition_to(Completed).is_applied());
        // Skipping ahead is still forward.
        assert!(PendingDropoff.transition_to(ReadyForPickup).is_applied());
    }

    #[test]
    fn test_backward_and_repeat_targets_are_already_applied() {
        assert_eq!(
            ReadyForPickup.transition_to(DroppedOff),
            Transition::AlreadyApplied
        );
        assert_eq!(
            ReadyForPickup.transition_to(ReadyForPickup),
            Transition::AlreadyApplied
        );
        assert_eq!(
            PendingDropoff.transition_to(PendingDropoff),
            Transition::AlreadyApplied
        );
    }

    #[test]
    fn test_side_branches_from_every_non_terminal_status() {
        for from in [PendingDropoff, DroppedOff, ReadyForPickup] {
            assert!(from.transition_to(Cancelled).is_applied(), "{from} → cancelled");
            assert!(from.transition_to(Expired).is_applied(), "{from} → expired");
        }
    }

    #[test]
    fn test_terminal_statuses_never_move() {
        for from in [Completed, Cancelled, Expired] {
            for to in PickupStatus::ALL {
                assert_eq!(from.transition_to(to), Transition::Terminal);
            }
        }
    }

    #[test]
    fn test_no_transition_moves_backward_on_the_happy_path() {
        for from in PickupStatus::ALL {
            for to in PickupStatus::ALL {
                if let Transition::Apply { from, to } = from.transition_to(to)
                    && let (Some(a), Some(b)) = (from.rank(), to.rank())
                {
                    assert!(b > a, "{from} → {to} went backward");
                }
            }
        }
    }

    #[test]
    fn test_notifications_on_entry() {
        assert_eq!(PendingDropoff.notification_on_entry(), None);
        assert_eq!(DroppedOff.notification_on_entry(), None);
        assert_eq!(
            ReadyForPickup.notification_on_entry(),
            Some(NotificationKind::PickupReady)
        );
        assert_eq!(
            Expired.notification_on_entry(),
            Some(NotificationKind::Expired)
        );
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in PickupStatus::ALL {
            assert_eq!(status.as_str().parse::<PickupStatus>(), Ok(status));
        }
        assert!("shipped".parse::<PickupStatus>().is_err());
    }
}
