//! `PostgreSQL` implementation of [`PickupStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::{PgPool, Postgres, Transaction};

use locker_pickup_core::{
    CustomerContact, DeliveryState, Email, EventDisposition, EventSource, EventType,
    LockerEventId, NotificationId, NotificationKind, OrderId, PhoneNumber, PickupStatus,
    PreferenceId, SizeClass, StoreId,
};

use super::{CreatedOrder, PickupStore, RecordedEvent, RepositoryError, STALE_CLAIM_AFTER};
use crate::models::{
    DeliveryResult, LockerEvent, LockerPreference, NewLockerEvent, NewOrder, OrderHint,
    PickupNotification, PickupOrder, Reservation, Store,
};
use crate::services::lifecycle::{Decision, EventOutcome, NotificationPolicy, StatusChange, decide};

const STORE_COLUMNS: &str = "id, shop, provider_client_id, provider_client_secret, \
    commerce_access_token, installed_at, disabled_at";

const ORDER_COLUMNS: &str = "id, store_id, external_order_id, customer_name, customer_email, \
    customer_phone, required_size, location_id, location_name, compartment_id, allocated_at, \
    dropoff_request_id, dropoff_link, pickup_request_id, pickup_link, status, ready_at, \
    allocation_attempts, last_allocation_error, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, order_id, event_type, source, disposition, delivery_id, \
    locker_id, tower_id, provider_ts, payload, received_at";

const NOTIFICATION_COLUMNS: &str =
    "id, order_id, event_id, kind, state, attempts, last_error, created_at, updated_at, sent_at";

/// Store backed by the engine's `PostgreSQL` database.
#[derive(Clone)]
pub struct PgPickupStore {
    pool: PgPool,
}

impl PgPickupStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row types
// =============================================================================

#[derive(sqlx::FromRow)]
struct StoreRow {
    id: StoreId,
    shop: String,
    provider_client_id: String,
    provider_client_secret: String,
    commerce_access_token: Option<String>,
    installed_at: DateTime<Utc>,
    disabled_at: Option<DateTime<Utc>>,
}

impl From<StoreRow> for Store {
    fn from(row: StoreRow) -> Self {
        Self {
            id: row.id,
            shop: row.shop,
            provider_client_id: row.provider_client_id,
            provider_client_secret: SecretString::from(row.provider_client_secret),
            commerce_access_token: row.commerce_access_token.map(SecretString::from),
            installed_at: row.installed_at,
            disabled_at: row.disabled_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PreferenceRow {
    id: PreferenceId,
    store_id: StoreId,
    location_id: String,
    display_name: String,
    enabled: bool,
}

impl From<PreferenceRow> for LockerPreference {
    fn from(row: PreferenceRow) -> Self {
        Self {
            id: row.id,
            store_id: row.store_id,
            location_id: row.location_id,
            display_name: row.display_name,
            enabled: row.enabled,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    store_id: StoreId,
    external_order_id: String,
    customer_name: String,
    customer_email: Option<String>,
    customer_phone: Option<String>,
    required_size: SizeClass,
    location_id: Option<String>,
    location_name: Option<String>,
    compartment_id: Option<String>,
    allocated_at: Option<DateTime<Utc>>,
    dropoff_request_id: Option<String>,
    dropoff_link: Option<String>,
    pickup_request_id: Option<String>,
    pickup_link: Option<String>,
    status: PickupStatus,
    ready_at: Option<DateTime<Utc>>,
    allocation_attempts: i32,
    last_allocation_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for PickupOrder {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let email = row
            .customer_email
            .as_deref()
            .map(Email::parse)
            .transpose()
            .map_err(|e| RepositoryError::DataCorruption(format!("order {}: {e}", row.id)))?;
        let phone = row
            .customer_phone
            .as_deref()
            .map(PhoneNumber::parse)
            .transpose()
            .map_err(|e| RepositoryError::DataCorruption(format!("order {}: {e}", row.id)))?;

        Ok(Self {
            id: row.id,
            store_id: row.store_id,
            external_order_id: row.external_order_id,
            customer: CustomerContact {
                name: row.customer_name,
                email,
                phone,
            },
            required_size: row.required_size,
            location_id: row.location_id,
            location_name: row.location_name,
            compartment_id: row.compartment_id,
            allocated_at: row.allocated_at,
            dropoff_request_id: row.dropoff_request_id,
            dropoff_link: row.dropoff_link,
            pickup_request_id: row.pickup_request_id,
            pickup_link: row.pickup_link,
            status: row.status,
            ready_at: row.ready_at,
            allocation_attempts: row.allocation_attempts,
            last_allocation_error: row.last_allocation_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: LockerEventId,
    order_id: Option<OrderId>,
    event_type: String,
    source: EventSource,
    disposition: EventDisposition,
    delivery_id: Option<String>,
    locker_id: Option<String>,
    tower_id: Option<String>,
    provider_ts: DateTime<Utc>,
    payload: serde_json::Value,
    received_at: DateTime<Utc>,
}

impl From<EventRow> for LockerEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            event_type: EventType::from_wire(&row.event_type),
            source: row.source,
            disposition: row.disposition,
            delivery_id: row.delivery_id,
            locker_id: row.locker_id,
            tower_id: row.tower_id,
            provider_ts: row.provider_ts,
            payload: row.payload,
            received_at: row.received_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: NotificationId,
    order_id: OrderId,
    event_id: LockerEventId,
    kind: NotificationKind,
    state: DeliveryState,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl From<NotificationRow> for PickupNotification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            event_id: row.event_id,
            kind: row.kind,
            state: row.state,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
        }
    }
}

fn into_orders(rows: Vec<OrderRow>) -> Result<Vec<PickupOrder>, RepositoryError> {
    rows.into_iter().map(PickupOrder::try_from).collect()
}

// =============================================================================
// Transaction helpers
// =============================================================================

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &NewLockerEvent,
    order_id: Option<OrderId>,
    disposition: EventDisposition,
) -> Result<LockerEvent, RepositoryError> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        r"
        INSERT INTO locker_events (
            order_id, event_type, source, disposition, delivery_id,
            locker_id, tower_id, provider_ts, payload
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {EVENT_COLUMNS}
        "
    ))
    .bind(order_id)
    .bind(event.event_type.as_wire())
    .bind(event.source)
    .bind(disposition)
    .bind(&event.delivery_id)
    .bind(&event.locker_id)
    .bind(&event.tower_id)
    .bind(event.provider_ts)
    .bind(&event.payload)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.into())
}

async fn is_duplicate(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
    event: &NewLockerEvent,
) -> Result<bool, RepositoryError> {
    let exists: bool = sqlx::query_scalar(
        r"
        SELECT EXISTS (
            SELECT 1 FROM locker_events
            WHERE order_id = $1
              AND event_type = $2
              AND provider_ts = $3
              AND disposition <> 'duplicate'
        )
        ",
    )
    .bind(order_id)
    .bind(event.event_type.as_wire())
    .bind(event.provider_ts)
    .fetch_one(&mut **tx)
    .await?;

    Ok(exists)
}

async fn apply_change(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
    change: &StatusChange,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        UPDATE pickup_orders
        SET status = $2,
            ready_at = COALESCE($3, ready_at),
            pickup_request_id = COALESCE($4, pickup_request_id),
            pickup_link = COALESCE($5, pickup_link),
            updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(order_id)
    .bind(change.status)
    .bind(change.ready_at)
    .bind(&change.pickup_request_id)
    .bind(&change.pickup_link)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

// =============================================================================
// PickupStore
// =============================================================================

#[async_trait]
impl PickupStore for PgPickupStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn store_by_shop(&self, shop: &str) -> Result<Option<Store>, RepositoryError> {
        let row = sqlx::query_as::<_, StoreRow>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores WHERE shop = $1"
        ))
        .bind(shop)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn store_by_id(&self, id: StoreId) -> Result<Option<Store>, RepositoryError> {
        let row = sqlx::query_as::<_, StoreRow>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn enabled_preferences(
        &self,
        store_id: StoreId,
    ) -> Result<Vec<LockerPreference>, RepositoryError> {
        let rows = sqlx::query_as::<_, PreferenceRow>(
            r"
            SELECT id, store_id, location_id, display_name, enabled
            FROM locker_preferences
            WHERE store_id = $1 AND enabled
            ORDER BY id
            ",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_order(&self, new: NewOrder) -> Result<CreatedOrder, RepositoryError> {
        let inserted = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            INSERT INTO pickup_orders (
                store_id, external_order_id, customer_name, customer_email,
                customer_phone, required_size
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (store_id, external_order_id) WHERE status <> 'cancelled'
            DO NOTHING
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(new.store_id)
        .bind(&new.external_order_id)
        .bind(&new.customer.name)
        .bind(new.customer.email.as_ref().map(Email::as_str))
        .bind(new.customer.phone.as_ref().map(PhoneNumber::as_str))
        .bind(new.required_size)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(CreatedOrder {
                order: row.try_into()?,
                created: true,
            });
        }

        let existing = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS} FROM pickup_orders
            WHERE store_id = $1 AND external_order_id = $2 AND status <> 'cancelled'
            "
        ))
        .bind(new.store_id)
        .bind(&new.external_order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            RepositoryError::Conflict(format!(
                "order {} conflicted but no live row was found",
                new.external_order_id
            ))
        })?;

        Ok(CreatedOrder {
            order: existing.try_into()?,
            created: false,
        })
    }

    async fn order(&self, id: OrderId) -> Result<Option<PickupOrder>, RepositoryError> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM pickup_orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(PickupOrder::try_from)
        .transpose()
    }

    async fn commit_reservation(
        &self,
        id: OrderId,
        reservation: &Reservation,
    ) -> Result<PickupOrder, RepositoryError> {
        let committed = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            UPDATE pickup_orders
            SET location_id = $2,
                location_name = $3,
                compartment_id = $4,
                dropoff_request_id = $5,
                dropoff_link = $6,
                allocated_at = NOW(),
                last_allocation_error = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND dropoff_request_id IS NULL
              AND status = 'pending_dropoff'
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(id)
        .bind(&reservation.location_id)
        .bind(&reservation.location_name)
        .bind(&reservation.compartment_id)
        .bind(&reservation.dropoff_request_id)
        .bind(&reservation.dropoff_link)
        .fetch_optional(&self.pool)
        .await?;

        match committed {
            Some(row) => row.try_into(),
            // Lost the race, or the order moved on. Return what is there.
            None => self.order(id).await?.ok_or(RepositoryError::NotFound),
        }
    }

    async fn record_allocation_failure(
        &self,
        id: OrderId,
        attempts: u32,
        error: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE pickup_orders
            SET allocation_attempts = allocation_attempts + $2,
                last_allocation_error = $3,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn resolve_order(&self, hint: &OrderHint) -> Result<Option<OrderId>, RepositoryError> {
        if let Some(delivery_id) = &hint.delivery_id {
            let found: Option<OrderId> = sqlx::query_scalar(
                r"
                SELECT id FROM pickup_orders
                WHERE dropoff_request_id = $1 OR pickup_request_id = $1
                ORDER BY id DESC
                LIMIT 1
                ",
            )
            .bind(delivery_id)
            .fetch_optional(&self.pool)
            .await?;

            if found.is_some() {
                return Ok(found);
            }
        }

        let Some(locker_id) = &hint.locker_id else {
            return Ok(None);
        };

        let found: Option<OrderId> = sqlx::query_scalar(
            r"
            SELECT id FROM pickup_orders
            WHERE compartment_id = $1
              AND ($2::text IS NULL OR location_id = $2)
              AND status IN ('pending_dropoff', 'dropped_off', 'ready_for_pickup')
              AND allocated_at <= $3
            ORDER BY allocated_at DESC
            LIMIT 1
            ",
        )
        .bind(locker_id)
        .bind(&hint.tower_id)
        .bind(hint.occurred_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found)
    }

    async fn record_event(
        &self,
        event: NewLockerEvent,
        policy: NotificationPolicy,
    ) -> Result<RecordedEvent, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let locked = match event.order_id {
            Some(order_id) => sqlx::query_as::<_, OrderRow>(&format!(
                "SELECT {ORDER_COLUMNS} FROM pickup_orders WHERE id = $1 FOR UPDATE"
            ))
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(PickupOrder::try_from)
            .transpose()?,
            None => None,
        };

        let Some(order) = locked else {
            let recorded = insert_event(&mut tx, &event, None, EventDisposition::Unmatched).await?;
            tx.commit().await?;
            return Ok(RecordedEvent {
                event: recorded,
                outcome: EventOutcome::Unmatched,
                notification: None,
            });
        };

        let decision = if is_duplicate(&mut tx, order.id, &event).await? {
            Decision::duplicate()
        } else {
            decide(order.status, &event.event_type, policy)
        };

        if let EventOutcome::Applied { to, .. } = decision.outcome {
            let change = StatusChange::for_transition(to, &event, Utc::now());
            apply_change(&mut tx, order.id, &change).await?;
        }

        let recorded = insert_event(
            &mut tx,
            &event,
            Some(order.id),
            decision.outcome.disposition(),
        )
        .await?;

        let notification = match decision.notification {
            Some(kind) => Some(
                sqlx::query_scalar::<_, NotificationId>(
                    r"
                    INSERT INTO pickup_notifications (order_id, event_id, kind)
                    VALUES ($1, $2, $3)
                    RETURNING id
                    ",
                )
                .bind(order.id)
                .bind(recorded.id)
                .bind(kind)
                .fetch_one(&mut *tx)
                .await?,
            ),
            None => None,
        };

        tx.commit().await?;

        Ok(RecordedEvent {
            event: recorded,
            outcome: decision.outcome,
            notification,
        })
    }

    async fn order_events(&self, id: OrderId) -> Result<Vec<LockerEvent>, RepositoryError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM locker_events WHERE order_id = $1 ORDER BY received_at, id"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn unmatched_events(&self, limit: i64) -> Result<Vec<LockerEvent>, RepositoryError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r"
            SELECT {EVENT_COLUMNS} FROM locker_events
            WHERE order_id IS NULL
            ORDER BY received_at DESC, id DESC
            LIMIT $1
            "
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn orders_by_status(
        &self,
        store_id: StoreId,
        status: PickupStatus,
        limit: i64,
    ) -> Result<Vec<PickupOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS} FROM pickup_orders
            WHERE store_id = $1 AND status = $2
            ORDER BY updated_at DESC
            LIMIT $3
            "
        ))
        .bind(store_id)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_orders(rows)
    }

    async fn stuck_orders(&self, limit: i64) -> Result<Vec<PickupOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS} FROM pickup_orders
            WHERE status = 'pending_dropoff' AND dropoff_request_id IS NULL
            ORDER BY created_at
            LIMIT $1
            "
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_orders(rows)
    }

    async fn overdue_orders(
        &self,
        ready_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PickupOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS} FROM pickup_orders
            WHERE status = 'ready_for_pickup' AND ready_at <= $1
            ORDER BY ready_at
            LIMIT $2
            "
        ))
        .bind(ready_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_orders(rows)
    }

    async fn notification(
        &self,
        id: NotificationId,
    ) -> Result<Option<PickupNotification>, RepositoryError> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM pickup_notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn claim_notification(
        &self,
        id: NotificationId,
    ) -> Result<Option<PickupNotification>, RepositoryError> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r"
            UPDATE pickup_notifications
            SET state = 'sending', attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1
              AND (state IN ('pending', 'failed')
                   OR (state = 'sending' AND updated_at < $2))
            RETURNING {NOTIFICATION_COLUMNS}
            "
        ))
        .bind(id)
        .bind(Utc::now() - STALE_CLAIM_AFTER)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn finish_notification(
        &self,
        id: NotificationId,
        result: &DeliveryResult,
    ) -> Result<(), RepositoryError> {
        let (state, error) = match result {
            DeliveryResult::Sent => (DeliveryState::Sent, None),
            DeliveryResult::Failed(message) => (DeliveryState::Failed, Some(message.as_str())),
        };

        sqlx::query(
            r"
            UPDATE pickup_notifications
            SET state = $2,
                last_error = $3,
                sent_at = CASE WHEN $2 = 'sent'::delivery_state THEN NOW() ELSE sent_at END,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(state)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn undelivered_notifications(
        &self,
        limit: i64,
    ) -> Result<Vec<PickupNotification>, RepositoryError> {
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            r"
            SELECT {NOTIFICATION_COLUMNS} FROM pickup_notifications
            WHERE state IN ('pending', 'failed')
               OR (state = 'sending' AND updated_at < $1)
            ORDER BY created_at
            LIMIT $2
            "
        ))
        .bind(Utc::now() - STALE_CLAIM_AFTER)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
