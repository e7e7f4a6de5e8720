//! Provider webhook ingestion.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use locker_pickup_core::{EventSource, OrderId};

use super::lifecycle::{EventOutcome, LifecycleService};
use crate::db::{PickupStore, RepositoryError};
use crate::models::NewLockerEvent;
use crate::provider::webhook::ProviderWebhook;

/// Errors from ingestion. Unmatched and duplicate events are outcomes, not errors.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Body is not a provider event. Nothing was stored.
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What ingesting one webhook did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ingested {
    pub order_id: Option<OrderId>,
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

/// Turns provider webhooks into lifecycle events.
#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn PickupStore>,
    lifecycle: LifecycleService,
}

impl IngestionService {
    #[must_use]
    pub fn new(store: Arc<dyn PickupStore>, lifecycle: LifecycleService) -> Self {
        Self { store, lifecycle }
    }

    /// Parse a webhook body, resolve its order and apply it.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Malformed` if the body does not parse, and
    /// `IngestError::Repository` if the event could not be stored.
    #[instrument(skip_all)]
    pub async fn ingest(&self, body: &[u8]) -> Result<Ingested, IngestError> {
        let payload: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| IngestError::Malformed(e.to_string()))?;
        let webhook: ProviderWebhook = serde_json::from_value(payload.clone())
            .map_err(|e| IngestError::Malformed(e.to_string()))?;

        let order_id = self.store.resolve_order(&webhook.hint()).await?;
        if order_id.is_none() {
            tracing::warn!(
                event_type = %webhook.event_type,
                delivery_id = ?webhook.delivery_id,
                locker_id = ?webhook.locker_id,
                "Webhook matched no order"
            );
        }

        let event = NewLockerEvent {
            order_id,
            event_type: webhook.event_type,
            source: EventSource::Provider,
            delivery_id: webhook.delivery_id.or_else(|| webhook.pickup_delivery_id.clone()),
            locker_id: webhook.locker_id,
            tower_id: webhook.tower_id,
            pickup_request_id: webhook.pickup_delivery_id,
            access_link: webhook.access_link,
            provider_ts: webhook.occurred_at,
            payload,
        };

        let outcome = self.lifecycle.apply(event).await?;
        Ok(Ingested { order_id, outcome })
    }
}
