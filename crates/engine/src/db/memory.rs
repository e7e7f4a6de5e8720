//! In-process [`PickupStore`] for tests.
//!
//! One mutex guards every table, which serializes writes the way the order
//! row lock does in `PostgreSQL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::Mutex;

use locker_pickup_core::{
    DeliveryState, EventDisposition, LockerEventId, NotificationId, OrderId, PickupStatus,
    PreferenceId, StoreId,
};

use super::{CreatedOrder, PickupStore, RecordedEvent, RepositoryError, STALE_CLAIM_AFTER};
use crate::models::{
    DeliveryResult, LockerEvent, LockerPreference, NewLockerEvent, NewOrder, OrderHint,
    PickupNotification, PickupOrder, Reservation, Store,
};
use crate::services::lifecycle::{Decision, EventOutcome, NotificationPolicy, StatusChange, decide};

#[derive(Default)]
struct Tables {
    stores: Vec<Store>,
    preferences: Vec<LockerPreference>,
    orders: Vec<PickupOrder>,
    events: Vec<LockerEvent>,
    notifications: Vec<PickupNotification>,
    next_id: i64,
}

impl Tables {
    const fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn order_mut(&mut self, id: OrderId) -> Option<&mut PickupOrder> {
        self.orders.iter_mut().find(|order| order.id == id)
    }

    fn push_event(
        &mut self,
        event: &NewLockerEvent,
        order_id: Option<OrderId>,
        disposition: EventDisposition,
    ) -> LockerEvent {
        let record = LockerEvent {
            id: LockerEventId::new(self.next_id()),
            order_id,
            event_type: event.event_type.clone(),
            source: event.source,
            disposition,
            delivery_id: event.delivery_id.clone(),
            locker_id: event.locker_id.clone(),
            tower_id: event.tower_id.clone(),
            provider_ts: event.provider_ts,
            payload: event.payload.clone(),
            received_at: Utc::now(),
        };
        self.events.push(record.clone());
        record
    }
}

fn claimable(notification: &PickupNotification, now: DateTime<Utc>) -> bool {
    match notification.state {
        DeliveryState::Pending | DeliveryState::Failed => true,
        DeliveryState::Sending => notification.updated_at < now - STALE_CLAIM_AFTER,
        DeliveryState::Sent => false,
    }
}

/// [`PickupStore`] kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a merchant install.
    pub async fn insert_store(&self, shop: &str, client_id: &str, client_secret: &str) -> Store {
        let mut tables = self.tables.lock().await;
        let store = Store {
            id: StoreId::new(tables.next_id()),
            shop: shop.to_string(),
            provider_client_id: client_id.to_string(),
            provider_client_secret: SecretString::from(client_secret.to_string()),
            commerce_access_token: None,
            installed_at: Utc::now(),
            disabled_at: None,
        };
        tables.stores.push(store.clone());
        store
    }

    /// Replace a stored install, e.g. to disable it or attach a commerce token.
    pub async fn update_store(&self, store: Store) {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.stores.iter_mut().find(|s| s.id == store.id) {
            *existing = store;
        }
    }

    /// Approve a locker location for a store.
    pub async fn insert_preference(
        &self,
        store_id: StoreId,
        location_id: &str,
        display_name: &str,
        enabled: bool,
    ) -> LockerPreference {
        let mut tables = self.tables.lock().await;
        let preference = LockerPreference {
            id: PreferenceId::new(tables.next_id()),
            store_id,
            location_id: location_id.to_string(),
            display_name: display_name.to_string(),
            enabled,
        };
        tables.preferences.push(preference.clone());
        preference
    }

    /// Move an order's hold clock, for expiry tests.
    pub async fn set_ready_at(&self, id: OrderId, ready_at: DateTime<Utc>) {
        let mut tables = self.tables.lock().await;
        if let Some(order) = tables.order_mut(id) {
            order.ready_at = Some(ready_at);
        }
    }

    /// Every notification, in creation order.
    pub async fn notifications(&self) -> Vec<PickupNotification> {
        self.tables.lock().await.notifications.clone()
    }
}

#[async_trait]
impl PickupStore for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn store_by_shop(&self, shop: &str) -> Result<Option<Store>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables.stores.iter().find(|s| s.shop == shop).cloned())
    }

    async fn store_by_id(&self, id: StoreId) -> Result<Option<Store>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables.stores.iter().find(|s| s.id == id).cloned())
    }

    async fn enabled_preferences(
        &self,
        store_id: StoreId,
    ) -> Result<Vec<LockerPreference>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .preferences
            .iter()
            .filter(|p| p.store_id == store_id && p.enabled)
            .cloned()
            .collect())
    }

    async fn create_order(&self, new: NewOrder) -> Result<CreatedOrder, RepositoryError> {
        let mut tables = self.tables.lock().await;

        if let Some(existing) = tables.orders.iter().find(|o| {
            o.store_id == new.store_id
                && o.external_order_id == new.external_order_id
                && o.status != PickupStatus::Cancelled
        }) {
            return Ok(CreatedOrder {
                order: existing.clone(),
                created: false,
            });
        }

        let now = Utc::now();
        let order = PickupOrder {
            id: OrderId::new(tables.next_id()),
            store_id: new.store_id,
            external_order_id: new.external_order_id,
            customer: new.customer,
            required_size: new.required_size,
            location_id: None,
            location_name: None,
            compartment_id: None,
            allocated_at: None,
            dropoff_request_id: None,
            dropoff_link: None,
            pickup_request_id: None,
            pickup_link: None,
            status: PickupStatus::PendingDropoff,
            ready_at: None,
            allocation_attempts: 0,
            last_allocation_error: None,
            created_at: now,
            updated_at: now,
        };
        tables.orders.push(order.clone());

        Ok(CreatedOrder {
            order,
            created: true,
        })
    }

    async fn order(&self, id: OrderId) -> Result<Option<PickupOrder>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn commit_reservation(
        &self,
        id: OrderId,
        reservation: &Reservation,
    ) -> Result<PickupOrder, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let order = tables.order_mut(id).ok_or(RepositoryError::NotFound)?;

        if order.dropoff_request_id.is_none() && order.status == PickupStatus::PendingDropoff {
            let now = Utc::now();
            order.location_id = Some(reservation.location_id.clone());
            order.location_name = Some(reservation.location_name.clone());
            order.compartment_id.clone_from(&reservation.compartment_id);
            order.dropoff_request_id = Some(reservation.dropoff_request_id.clone());
            order.dropoff_link = Some(reservation.dropoff_link.clone());
            order.allocated_at = Some(now);
            order.last_allocation_error = None;
            order.updated_at = now;
        }

        Ok(order.clone())
    }

    async fn record_allocation_failure(
        &self,
        id: OrderId,
        attempts: u32,
        error: &str,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        let order = tables.order_mut(id).ok_or(RepositoryError::NotFound)?;
        order.allocation_attempts = order
            .allocation_attempts
            .saturating_add(i32::try_from(attempts).unwrap_or(i32::MAX));
        order.last_allocation_error = Some(error.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn resolve_order(&self, hint: &OrderHint) -> Result<Option<OrderId>, RepositoryError> {
        let tables = self.tables.lock().await;

        if let Some(delivery_id) = &hint.delivery_id {
            let found = tables.orders.iter().rev().find(|o| {
                o.dropoff_request_id.as_ref() == Some(delivery_id)
                    || o.pickup_request_id.as_ref() == Some(delivery_id)
            });
            if let Some(order) = found {
                return Ok(Some(order.id));
            }
        }

        let Some(locker_id) = &hint.locker_id else {
            return Ok(None);
        };

        Ok(tables
            .orders
            .iter()
            .filter(|o| o.compartment_id.as_ref() == Some(locker_id))
            .filter(|o| hint.tower_id.is_none() || o.location_id == hint.tower_id)
            .filter(|o| !o.status.is_terminal())
            .filter(|o| o.allocated_at.is_some_and(|at| at <= hint.occurred_at))
            .max_by_key(|o| o.allocated_at)
            .map(|o| o.id))
    }

    async fn record_event(
        &self,
        event: NewLockerEvent,
        policy: NotificationPolicy,
    ) -> Result<RecordedEvent, RepositoryError> {
        let mut tables = self.tables.lock().await;

        let current = event
            .order_id
            .and_then(|id| tables.orders.iter().find(|o| o.id == id))
            .map(|o| (o.id, o.status));

        let Some((order_id, status)) = current else {
            let recorded = tables.push_event(&event, None, EventDisposition::Unmatched);
            return Ok(RecordedEvent {
                event: recorded,
                outcome: EventOutcome::Unmatched,
                notification: None,
            });
        };

        let duplicate = tables.events.iter().any(|e| {
            e.order_id == Some(order_id)
                && e.event_type == event.event_type
                && e.provider_ts == event.provider_ts
                && e.disposition != EventDisposition::Duplicate
        });

        let decision = if duplicate {
            Decision::duplicate()
        } else {
            decide(status, &event.event_type, policy)
        };

        if let EventOutcome::Applied { to, .. } = decision.outcome {
            let now = Utc::now();
            let change = StatusChange::for_transition(to, &event, now);
            if let Some(order) = tables.order_mut(order_id) {
                order.status = change.status;
                if change.ready_at.is_some() {
                    order.ready_at = change.ready_at;
                }
                if change.pickup_request_id.is_some() {
                    order.pickup_request_id = change.pickup_request_id;
                }
                if change.pickup_link.is_some() {
                    order.pickup_link = change.pickup_link;
                }
                order.updated_at = now;
            }
        }

        let recorded = tables.push_event(&event, Some(order_id), decision.outcome.disposition());

        let notification = decision.notification.map(|kind| {
            let now = Utc::now();
            let id = NotificationId::new(tables.next_id());
            tables.notifications.push(PickupNotification {
                id,
                order_id,
                event_id: recorded.id,
                kind,
                state: DeliveryState::Pending,
                attempts: 0,
                last_error: None,
                created_at: now,
                updated_at: now,
                sent_at: None,
            });
            id
        });

        Ok(RecordedEvent {
            event: recorded,
            outcome: decision.outcome,
            notification,
        })
    }

    async fn order_events(&self, id: OrderId) -> Result<Vec<LockerEvent>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.order_id == Some(id))
            .cloned()
            .collect())
    }

    async fn unmatched_events(&self, limit: i64) -> Result<Vec<LockerEvent>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .events
            .iter()
            .rev()
            .filter(|e| e.order_id.is_none())
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn orders_by_status(
        &self,
        store_id: StoreId,
        status: PickupStatus,
        limit: i64,
    ) -> Result<Vec<PickupOrder>, RepositoryError> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<PickupOrder> = tables
            .orders
            .iter()
            .filter(|o| o.store_id == store_id && o.status == status)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        orders.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(orders)
    }

    async fn stuck_orders(&self, limit: i64) -> Result<Vec<PickupOrder>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .orders
            .iter()
            .filter(|o| o.is_awaiting_allocation())
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn overdue_orders(
        &self,
        ready_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PickupOrder>, RepositoryError> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<PickupOrder> = tables
            .orders
            .iter()
            .filter(|o| o.status == PickupStatus::ReadyForPickup)
            .filter(|o| o.ready_at.is_some_and(|at| at <= ready_before))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.ready_at);
        orders.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(orders)
    }

    async fn notification(
        &self,
        id: NotificationId,
    ) -> Result<Option<PickupNotification>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables.notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn claim_notification(
        &self,
        id: NotificationId,
    ) -> Result<Option<PickupNotification>, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let Some(notification) = tables.notifications.iter_mut().find(|n| n.id == id) else {
            return Ok(None);
        };
        if !claimable(notification, now) {
            return Ok(None);
        }

        notification.state = DeliveryState::Sending;
        notification.attempts += 1;
        notification.updated_at = now;
        Ok(Some(notification.clone()))
    }

    async fn finish_notification(
        &self,
        id: NotificationId,
        result: &DeliveryResult,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        let notification = tables
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(RepositoryError::NotFound)?;

        let now = Utc::now();
        match result {
            DeliveryResult::Sent => {
                notification.state = DeliveryState::Sent;
                notification.last_error = None;
                notification.sent_at = Some(now);
            }
            DeliveryResult::Failed(message) => {
                notification.state = DeliveryState::Failed;
                notification.last_error = Some(message.clone());
            }
        }
        notification.updated_at = now;
        Ok(())
    }

    async fn undelivered_notifications(
        &self,
        limit: i64,
    ) -> Result<Vec<PickupNotification>, RepositoryError> {
        let tables = self.tables.lock().await;
        let now = Utc::now();
        Ok(tables
            .notifications
            .iter()
            .filter(|n| claimable(n, now))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}
