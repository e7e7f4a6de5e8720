//! Domain records owned by the engine.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

use locker_pickup_core::{
    CustomerContact, DeliveryState, EventDisposition, EventSource, EventType, LockerEventId,
    NotificationId, NotificationKind, OrderId, PickupStatus, PreferenceId, SizeClass, StoreId,
};

/// A merchant install.
///
/// Implements `Debug` manually to redact the provider and commerce credentials.
#[derive(Clone)]
pub struct Store {
    pub id: StoreId,
    /// Shop domain (e.g. `acme.myshopify.com`).
    pub shop: String,
    /// OAuth client id issued by the locker provider.
    pub provider_client_id: String,
    pub provider_client_secret: SecretString,
    /// Admin API token used for order annotations.
    pub commerce_access_token: Option<SecretString>,
    pub installed_at: DateTime<Utc>,
    /// Set when the merchant uninstalls.
    pub disabled_at: Option<DateTime<Utc>>,
}

impl Store {
    /// Returns true unless the merchant has uninstalled.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.disabled_at.is_none()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("shop", &self.shop)
            .field("provider_client_id", &self.provider_client_id)
            .field("provider_client_secret", &"[REDACTED]")
            .field(
                "commerce_access_token",
                &self.commerce_access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("installed_at", &self.installed_at)
            .field("disabled_at", &self.disabled_at)
            .finish()
    }
}

/// A locker location the merchant has approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockerPreference {
    pub id: PreferenceId,
    pub store_id: StoreId,
    /// Provider location id.
    pub location_id: String,
    pub display_name: String,
    pub enabled: bool,
}

/// A pickup order and its allocation.
#[derive(Debug, Clone, Serialize)]
pub struct PickupOrder {
    pub id: OrderId,
    pub store_id: StoreId,
    /// Order id in the commerce platform.
    pub external_order_id: String,
    pub customer: CustomerContact,
    /// Smallest compartment that holds every line item.
    pub required_size: SizeClass,
    pub location_id: Option<String>,
    pub location_name: Option<String>,
    pub compartment_id: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub dropoff_request_id: Option<String>,
    pub dropoff_link: Option<String>,
    pub pickup_request_id: Option<String>,
    pub pickup_link: Option<String>,
    pub status: PickupStatus,
    /// When the order entered `ready_for_pickup`.
    pub ready_at: Option<DateTime<Utc>>,
    pub allocation_attempts: i32,
    pub last_allocation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PickupOrder {
    /// The committed reservation, if allocation has succeeded.
    #[must_use]
    pub fn reservation(&self) -> Option<Reservation> {
        Some(Reservation {
            location_id: self.location_id.clone()?,
            location_name: self.location_name.clone().unwrap_or_default(),
            compartment_id: self.compartment_id.clone(),
            dropoff_request_id: self.dropoff_request_id.clone()?,
            dropoff_link: self.dropoff_link.clone().unwrap_or_default(),
        })
    }

    /// Returns true while the order waits for a committed allocation.
    #[must_use]
    pub fn is_awaiting_allocation(&self) -> bool {
        self.status == PickupStatus::PendingDropoff && self.dropoff_request_id.is_none()
    }

    /// When the hold period ends, for orders that are ready for pickup.
    #[must_use]
    pub fn hold_deadline(&self, hold_period: chrono::Duration) -> Option<DateTime<Utc>> {
        match self.status {
            PickupStatus::ReadyForPickup => self.ready_at.map(|ready| ready + hold_period),
            _ => None,
        }
    }
}

/// Input for creating a pickup order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub store_id: StoreId,
    pub external_order_id: String,
    pub customer: CustomerContact,
    pub required_size: SizeClass,
}

/// A drop-off reservation committed onto an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub location_id: String,
    pub location_name: String,
    pub compartment_id: Option<String>,
    pub dropoff_request_id: String,
    pub dropoff_link: String,
}

impl Reservation {
    /// Human-readable description written back to the commerce order.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.compartment_id {
            Some(compartment) => format!(
                "{} (locker {compartment}, location {})",
                self.location_name, self.location_id
            ),
            None => format!("{} (location {})", self.location_name, self.location_id),
        }
    }
}

/// What an inbound event says about which order it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHint {
    /// Drop-off or pickup request id.
    pub delivery_id: Option<String>,
    /// Compartment the event happened at.
    pub locker_id: Option<String>,
    /// Location (tower) the compartment belongs to.
    pub tower_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// An event about to be written to the log.
#[derive(Debug, Clone)]
pub struct NewLockerEvent {
    /// `None` when no order could be resolved.
    pub order_id: Option<OrderId>,
    pub event_type: EventType,
    pub source: EventSource,
    pub delivery_id: Option<String>,
    pub locker_id: Option<String>,
    pub tower_id: Option<String>,
    /// Pickup request created by the provider once the parcel is ready.
    pub pickup_request_id: Option<String>,
    /// Pickup access link issued to the customer.
    pub access_link: Option<String>,
    /// Timestamp reported by the event's source.
    pub provider_ts: DateTime<Utc>,
    /// Raw payload as received.
    pub payload: serde_json::Value,
}

impl NewLockerEvent {
    /// An engine-originated event (merchant cancel, expiry sweep) for a known order.
    #[must_use]
    pub fn internal(order_id: OrderId, event_type: EventType, source: EventSource) -> Self {
        let now = Utc::now();
        Self {
            order_id: Some(order_id),
            payload: serde_json::json!({
                "event_type": event_type.as_wire(),
                "occurred_at": now,
            }),
            event_type,
            source,
            delivery_id: None,
            locker_id: None,
            tower_id: None,
            pickup_request_id: None,
            access_link: None,
            provider_ts: now,
        }
    }
}

/// An entry in the append-only event log.
#[derive(Debug, Clone, Serialize)]
pub struct LockerEvent {
    pub id: LockerEventId,
    pub order_id: Option<OrderId>,
    pub event_type: EventType,
    pub source: EventSource,
    pub disposition: EventDisposition,
    pub delivery_id: Option<String>,
    pub locker_id: Option<String>,
    pub tower_id: Option<String>,
    pub provider_ts: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// A customer notification owed for an applied transition.
#[derive(Debug, Clone, Serialize)]
pub struct PickupNotification {
    pub id: NotificationId,
    pub order_id: OrderId,
    /// Event whose transition caused this notification.
    pub event_id: LockerEventId,
    pub kind: NotificationKind,
    pub state: DeliveryState,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Final state of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Sent,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: PickupStatus) -> PickupOrder {
        let now = Utc::now();
        PickupOrder {
            id: OrderId::new(1),
            store_id: StoreId::new(1),
            external_order_id: "A-100".to_string(),
            customer: CustomerContact::default(),
            required_size: SizeClass::Small,
            location_id: None,
            location_name: None,
            compartment_id: None,
            allocated_at: None,
            dropoff_request_id: None,
            dropoff_link: None,
            pickup_request_id: None,
            pickup_link: None,
            status,
            ready_at: Some(now),
            allocation_attempts: 0,
            last_allocation_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reservation_requires_request_id() {
        let mut order = order(PickupStatus::PendingDropoff);
        order.location_id = Some("loc-1".to_string());
        assert!(order.reservation().is_none());
        assert!(order.is_awaiting_allocation());

        order.dropoff_request_id = Some("dr-1".to_string());
        order.dropoff_link = Some("https://l.test/d".to_string());
        let reservation = order.reservation().expect("reservation");
        assert_eq!(reservation.dropoff_request_id, "dr-1");
        assert!(!order.is_awaiting_allocation());
    }

    #[test]
    fn test_hold_deadline_only_when_ready() {
        let ready = order(PickupStatus::ReadyForPickup);
        let deadline = ready.hold_deadline(chrono::Duration::days(5));
        assert_eq!(deadline, ready.ready_at.map(|at| at + chrono::Duration::days(5)));
        assert!(order(PickupStatus::Completed)
            .hold_deadline(chrono::Duration::days(5))
            .is_none());
    }

    #[test]
    fn test_reservation_description() {
        let reservation = Reservation {
            location_id: "loc-9".to_string(),
            location_name: "Main St Tower".to_string(),
            compartment_id: Some("B12".to_string()),
            dropoff_request_id: "dr".to_string(),
            dropoff_link: "https://l.test".to_string(),
        };
        assert_eq!(
            reservation.describe(),
            "Main St Tower (locker B12, location loc-9)"
        );
    }
}
