//! Persistence for stores, orders, the event log and the notification outbox.
//!
//! # Tables
//!
//! - `stores` - Merchant installs and their provider credentials
//! - `locker_preferences` - Locker locations each merchant approved
//! - `pickup_orders` - Pickup orders, their allocation and status
//! - `locker_events` - Append-only log of every event, matched or not
//! - `pickup_notifications` - Outbox of customer notifications owed
//!
//! # Migrations
//!
//! Migrations are stored in `crates/engine/migrations/` and run via:
//! ```bash
//! cargo run -p locker-pickup-cli -- migrate
//! ```
//!
//! Everything the engine does to these tables goes through [`PickupStore`].
//! [`PgPickupStore`] is the production implementation. [`MemoryStore`] keeps
//! the same rules in process for tests.

#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use locker_pickup_core::{NotificationId, OrderId, PickupStatus, StoreId};

use crate::models::{
    DeliveryResult, LockerEvent, LockerPreference, NewLockerEvent, NewOrder, OrderHint,
    PickupNotification, PickupOrder, Reservation, Store,
};
use crate::services::lifecycle::{EventOutcome, NotificationPolicy};

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryStore;
pub use postgres::PgPickupStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation.
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// An event written to the log, with what it did.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub event: LockerEvent,
    pub outcome: EventOutcome,
    /// Outbox row created with the transition, if any.
    pub notification: Option<NotificationId>,
}

/// Result of [`PickupStore::create_order`].
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: PickupOrder,
    /// False when a live order for the same commerce order already existed.
    pub created: bool,
}

/// Persistence operations used by the engine.
///
/// [`record_event`](Self::record_event) and
/// [`commit_reservation`](Self::commit_reservation) are the only writes to an
/// order's lifecycle columns. Each runs as one unit of work under a per-order
/// lock.
#[async_trait]
pub trait PickupStore: Send + Sync {
    /// Check connectivity.
    async fn ping(&self) -> Result<(), RepositoryError>;

    async fn store_by_shop(&self, shop: &str) -> Result<Option<Store>, RepositoryError>;

    async fn store_by_id(&self, id: StoreId) -> Result<Option<Store>, RepositoryError>;

    /// Enabled locker preferences of a store.
    async fn enabled_preferences(
        &self,
        store_id: StoreId,
    ) -> Result<Vec<LockerPreference>, RepositoryError>;

    /// Create an order in `pending_dropoff`, or return the live order already
    /// recorded for the same (store, external order id).
    async fn create_order(&self, new: NewOrder) -> Result<CreatedOrder, RepositoryError>;

    async fn order(&self, id: OrderId) -> Result<Option<PickupOrder>, RepositoryError>;

    /// Write a reservation onto an order that has none.
    ///
    /// Returns the order as committed. If another reservation won the race,
    /// the returned order carries that one instead.
    async fn commit_reservation(
        &self,
        id: OrderId,
        reservation: &Reservation,
    ) -> Result<PickupOrder, RepositoryError>;

    /// Record failed allocation attempts for the dashboard.
    async fn record_allocation_failure(
        &self,
        id: OrderId,
        attempts: u32,
        error: &str,
    ) -> Result<(), RepositoryError>;

    /// Find the order an inbound event refers to.
    ///
    /// Matches the delivery id against drop-off and pickup request ids first.
    /// Otherwise picks the most recently allocated non-terminal order in the
    /// event's locker that was allocated before the event happened.
    async fn resolve_order(&self, hint: &OrderHint) -> Result<Option<OrderId>, RepositoryError>;

    /// Append an event and apply its transition in one unit of work.
    ///
    /// Under the order lock: detect duplicates on (order, type, source
    /// timestamp), run [`decide`](crate::services::lifecycle::decide), write
    /// the status change, the event row and any outbox row.
    async fn record_event(
        &self,
        event: NewLockerEvent,
        policy: NotificationPolicy,
    ) -> Result<RecordedEvent, RepositoryError>;

    /// Events of one order, oldest first.
    async fn order_events(&self, id: OrderId) -> Result<Vec<LockerEvent>, RepositoryError>;

    /// Events that matched no order, newest first.
    async fn unmatched_events(&self, limit: i64) -> Result<Vec<LockerEvent>, RepositoryError>;

    async fn orders_by_status(
        &self,
        store_id: StoreId,
        status: PickupStatus,
        limit: i64,
    ) -> Result<Vec<PickupOrder>, RepositoryError>;

    /// Orders still waiting for a committed allocation, oldest first.
    async fn stuck_orders(&self, limit: i64) -> Result<Vec<PickupOrder>, RepositoryError>;

    /// Ready orders that became ready at or before `ready_before`.
    async fn overdue_orders(
        &self,
        ready_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PickupOrder>, RepositoryError>;

    async fn notification(
        &self,
        id: NotificationId,
    ) -> Result<Option<PickupNotification>, RepositoryError>;

    /// Mark a notification as being delivered.
    ///
    /// Returns `None` if it was already sent or another dispatcher holds it.
    async fn claim_notification(
        &self,
        id: NotificationId,
    ) -> Result<Option<PickupNotification>, RepositoryError>;

    /// Record the result of a claimed delivery.
    async fn finish_notification(
        &self,
        id: NotificationId,
        result: &DeliveryResult,
    ) -> Result<(), RepositoryError>;

    /// Notifications that were never delivered, oldest first.
    async fn undelivered_notifications(
        &self,
        limit: i64,
    ) -> Result<Vec<PickupNotification>, RepositoryError>;
}

/// How long a claimed notification may stay in `sending` before it can be
/// claimed again.
pub const STALE_CLAIM_AFTER: chrono::Duration = chrono::Duration::minutes(10);

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
