//! Provider event types and how each one is recorded.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::status::PickupStatus;

/// Lifecycle event reported by the locker-network provider.
///
/// Wire names are dotted strings (`pickup.ready`). Anything the engine does not
/// recognise is kept verbatim as [`EventType::Unknown`] so it can be stored in
/// the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Parcel placed in the locker (`dropoff.completed`).
    DropoffCompleted,
    /// Pickup access link issued to the customer (`pickup.ready`).
    PickupReady,
    /// Customer collected the parcel (`pickup.completed`).
    PickupCompleted,
    /// Delivery cancelled by merchant or provider (`delivery.cancelled`).
    Cancelled,
    /// Hold period elapsed (`delivery.expired`).
    Expired,
    /// Any other event type.
    Unknown(String),
}

impl EventType {
    /// Parse a wire name. Never fails; unrecognised names become `Unknown`.
    #[must_use]
    pub fn from_wire(name: &str) -> Self {
        match name.trim() {
            "dropoff.completed" => Self::DropoffCompleted,
            "pickup.ready" => Self::PickupReady,
            "pickup.completed" => Self::PickupCompleted,
            "delivery.cancelled" => Self::Cancelled,
            "delivery.expired" => Self::Expired,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Wire name, as stored in the event log.
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            Self::DropoffCompleted => "dropoff.completed",
            Self::PickupReady => "pickup.ready",
            Self::PickupCompleted => "pickup.completed",
            Self::Cancelled => "delivery.cancelled",
            Self::Expired => "delivery.expired",
            Self::Unknown(name) => name,
        }
    }

    /// The status this event asks the order to move to.
    #[must_use]
    pub const fn target_status(&self) -> Option<PickupStatus> {
        match self {
            Self::DropoffCompleted => Some(PickupStatus::DroppedOff),
            Self::PickupReady => Some(PickupStatus::ReadyForPickup),
            Self::PickupCompleted => Some(PickupStatus::Completed),
            Self::Cancelled => Some(PickupStatus::Cancelled),
            Self::Expired => Some(PickupStatus::Expired),
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&name))
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "event_source", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Provider webhook.
    Provider,
    /// Merchant action through the engine API.
    Merchant,
    /// Hold-period expiry sweep.
    Sweep,
}

/// How an event was handled, stored alongside it in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "event_disposition", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    /// Moved the order to a new status.
    Applied,
    /// Target status was already reached or passed.
    AlreadyApplied,
    /// Order was already terminal.
    Terminal,
    /// Event type has no transition.
    UnknownType,
    /// No order could be resolved.
    Unmatched,
    /// Same (order, type, provider timestamp) seen before.
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_roundtrip() {
        for name in [
            "dropoff.completed",
            "pickup.ready",
            "pickup.completed",
            "delivery.cancelled",
            "delivery.expired",
        ] {
            let event = EventType::from_wire(name);
            assert!(!matches!(event, EventType::Unknown(_)), "{name}");
            assert_eq!(event.as_wire(), name);
        }
    }

    #[test]
    fn test_unknown_event_is_preserved() {
        let event = EventType::from_wire("locker.door_jammed");
        assert_eq!(event, EventType::Unknown("locker.door_jammed".to_string()));
        assert_eq!(event.target_status(), None);
        assert_eq!(event.to_string(), "locker.door_jammed");
    }

    #[test]
    fn test_targets() {
        assert_eq!(
            EventType::PickupReady.target_status(),
            Some(PickupStatus::ReadyForPickup)
        );
        assert_eq!(
            EventType::Expired.target_status(),
            Some(PickupStatus::Expired)
        );
    }

    #[test]
    fn test_deserialize_never_fails_on_unknown_names() {
        let event: EventType = serde_json::from_str("\"pickup.ready\"").expect("known");
        assert_eq!(event, EventType::PickupReady);
        let event: EventType = serde_json::from_str("\"x.y\"").expect("unknown");
        assert!(matches!(event, EventType::Unknown(_)));
    }
}
