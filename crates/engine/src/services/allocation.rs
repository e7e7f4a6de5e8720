//! Locker search and drop-off allocation.
//!
//! Search asks the store's provider for locations near the customer, keeps
//! the ones the merchant approved and ranks them. Allocation creates a
//! drop-off delivery at the chosen location and commits it onto the order at
//! most once.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use locker_pickup_core::{Coordinates, CustomerContact, OrderId, PickupStatus, SizeClass};

use crate::config::{RetrySettings, SearchSettings};
use crate::db::{CreatedOrder, PickupStore, RepositoryError};
use crate::models::{LockerPreference, NewOrder, PickupOrder, Reservation, Store};
use crate::provider::{
    CreatedDelivery, CredentialError, DeliveryRequest, LocationQuery, LockerProvider,
    ProviderError, ProviderLocation, ProviderResolver,
};
use crate::shopify::OrderAnnotator;

/// Errors from search and allocation.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("shop {0} is not installed")]
    UnknownStore(String),

    #[error("shop {0} is disabled")]
    StoreDisabled(String),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order is {0}; only pending_dropoff orders can be allocated")]
    NotAllocatable(PickupStatus),

    #[error("location {0} is not enabled for this shop")]
    LocationNotEnabled(String),

    #[error("no approved locker location nearby")]
    NoLocationsNearby,

    #[error("no free compartment fits this order")]
    NoCapacity,

    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Every attempt hit a provider outage. The order records the failure.
    #[error("provider unavailable after {attempts} attempts: {message}")]
    ProviderUnavailable { attempts: u32, message: String },

    #[error(transparent)]
    Provider(ProviderError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ProviderError> for AllocationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Credential(e) => Self::Credential(e),
            e if e.is_capacity_exhausted() => Self::NoCapacity,
            ProviderError::Unavailable(message) => Self::ProviderUnavailable {
                attempts: 1,
                message,
            },
            e => Self::Provider(e),
        }
    }
}

/// A ranked locker location the customer can choose.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockerCandidate {
    pub location_id: String,
    pub name: String,
    pub address: String,
    pub distance_m: f64,
    /// Free compartments at least as large as the order needs.
    pub available: u32,
}

/// A committed allocation.
#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub order: PickupOrder,
    pub reservation: Reservation,
    /// False when the order already had a reservation.
    pub created: bool,
}

/// Keep approved locations, count qualifying compartments and rank.
///
/// Returns `NoLocationsNearby` when no approved location was found and
/// `NoCapacity` when none of them has a compartment that fits.
fn rank_candidates(
    locations: Vec<ProviderLocation>,
    preferences: &[LockerPreference],
    required: SizeClass,
) -> Result<Vec<LockerCandidate>, AllocationError> {
    let approved: Vec<LockerCandidate> = locations
        .into_iter()
        .filter_map(|location| {
            let preference = preferences
                .iter()
                .find(|p| p.enabled && p.location_id == location.id)?;
            let name = if preference.display_name.is_empty() {
                location.name.clone()
            } else {
                preference.display_name.clone()
            };
            Some(LockerCandidate {
                available: location.available_for(required),
                location_id: location.id,
                name,
                address: location.address,
                distance_m: location.distance_m,
            })
        })
        .collect();

    if approved.is_empty() {
        return Err(AllocationError::NoLocationsNearby);
    }

    let mut candidates: Vec<LockerCandidate> =
        approved.into_iter().filter(|c| c.available > 0).collect();
    if candidates.is_empty() {
        return Err(AllocationError::NoCapacity);
    }

    candidates.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.available.cmp(&a.available))
    });
    Ok(candidates)
}

/// Search and allocation operations.
#[derive(Clone)]
pub struct AllocationService {
    store: Arc<dyn PickupStore>,
    providers: Arc<dyn ProviderResolver>,
    annotator: Option<Arc<dyn OrderAnnotator>>,
    search: SearchSettings,
    retry: RetrySettings,
}

impl AllocationService {
    #[must_use]
    pub fn new(
        store: Arc<dyn PickupStore>,
        providers: Arc<dyn ProviderResolver>,
        annotator: Option<Arc<dyn OrderAnnotator>>,
        search: SearchSettings,
        retry: RetrySettings,
    ) -> Self {
        Self {
            store,
            providers,
            annotator,
            search,
            retry,
        }
    }

    async fn active_store(&self, shop: &str) -> Result<Store, AllocationError> {
        let store = self
            .store
            .store_by_shop(shop)
            .await?
            .ok_or_else(|| AllocationError::UnknownStore(shop.to_string()))?;
        if !store.is_active() {
            return Err(AllocationError::StoreDisabled(store.shop));
        }
        Ok(store)
    }

    /// Approved locations near `near` with room for a `required` parcel,
    /// nearest first.
    ///
    /// `limit` caps the result and never exceeds the provider page limit.
    ///
    /// # Errors
    ///
    /// `NoLocationsNearby` and `NoCapacity` are business outcomes. Other
    /// variants are failures.
    #[instrument(skip(self, near))]
    pub async fn find_candidates(
        &self,
        shop: &str,
        near: Coordinates,
        required: SizeClass,
        limit: Option<u32>,
    ) -> Result<Vec<LockerCandidate>, AllocationError> {
        let store = self.active_store(shop).await?;
        let preferences = self.store.enabled_preferences(store.id).await?;
        if preferences.is_empty() {
            return Err(AllocationError::NoLocationsNearby);
        }

        let provider = self.providers.provider_for(&store).await?;
        let locations = provider
            .search_locations(&LocationQuery {
                near,
                radius_m: self.search.radius_m,
                limit: self.search.page_limit,
            })
            .await?;

        // The cap applies to approved candidates, never to the provider page.
        let mut candidates = rank_candidates(locations, &preferences, required)?;
        let cap = limit.map_or(self.search.page_limit, |l| l.clamp(1, self.search.page_limit));
        candidates.truncate(usize::try_from(cap).unwrap_or(usize::MAX));

        tracing::debug!(count = candidates.len(), "Locker candidates found");
        Ok(candidates)
    }

    /// Create a pickup order, or return the live one for the same commerce order.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError` for unknown or disabled shops, an empty order
    /// id, or repository failures.
    #[instrument(skip(self, customer, line_item_sizes))]
    pub async fn create_order(
        &self,
        shop: &str,
        external_order_id: &str,
        customer: CustomerContact,
        line_item_sizes: &[SizeClass],
    ) -> Result<CreatedOrder, AllocationError> {
        let external_order_id = external_order_id.trim();
        if external_order_id.is_empty() {
            return Err(AllocationError::InvalidInput(
                "external_order_id is required".to_string(),
            ));
        }

        let store = self.active_store(shop).await?;
        let created = self
            .store
            .create_order(NewOrder {
                store_id: store.id,
                external_order_id: external_order_id.to_string(),
                customer,
                required_size: SizeClass::required_for(line_item_sizes.iter().copied()),
            })
            .await?;

        if created.created {
            tracing::info!(order_id = %created.order.id, "Pickup order created");
        }
        Ok(created)
    }

    /// Reserve a drop-off at `location_id` for an order.
    ///
    /// An order that already has a reservation gets it back without a
    /// provider call. Provider outages are retried with backoff; credential
    /// failures are not and leave the order untouched.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError`. `NoCapacity` when the provider has no free
    /// compartment; `ProviderUnavailable` after the last retry, in which case
    /// the attempt count and error are recorded on the order.
    #[instrument(skip(self))]
    pub async fn allocate(
        &self,
        order_id: OrderId,
        location_id: &str,
    ) -> Result<Allocation, AllocationError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(AllocationError::OrderNotFound(order_id))?;

        if order.status.is_terminal() {
            return Err(AllocationError::NotAllocatable(order.status));
        }
        if let Some(reservation) = order.reservation() {
            tracing::debug!("Order already allocated");
            return Ok(Allocation {
                order,
                reservation,
                created: false,
            });
        }
        if order.status != PickupStatus::PendingDropoff {
            return Err(AllocationError::NotAllocatable(order.status));
        }

        let store = self
            .store
            .store_by_id(order.store_id)
            .await?
            .ok_or_else(|| AllocationError::UnknownStore(order.store_id.to_string()))?;
        if !store.is_active() {
            return Err(AllocationError::StoreDisabled(store.shop));
        }

        let preference = self
            .store
            .enabled_preferences(store.id)
            .await?
            .into_iter()
            .find(|p| p.location_id == location_id)
            .ok_or_else(|| AllocationError::LocationNotEnabled(location_id.to_string()))?;

        let provider = self.providers.provider_for(&store).await?;
        let request = DeliveryRequest {
            location_id: preference.location_id.clone(),
            reference: order.external_order_id.clone(),
            size: order.required_size,
            recipient: order.customer.clone(),
            idempotency_key: format!("pickup-order-{}-dropoff", order.id),
        };

        let created = self.create_with_retry(provider.as_ref(), &order, &request).await?;

        let reservation = Reservation {
            location_id: preference.location_id,
            location_name: preference.display_name,
            compartment_id: created.compartment_id,
            dropoff_request_id: created.id,
            dropoff_link: created.access_link,
        };
        let committed = self.store.commit_reservation(order.id, &reservation).await?;

        let Some(committed_reservation) = committed.reservation() else {
            return Err(AllocationError::NotAllocatable(committed.status));
        };
        let won = committed_reservation.dropoff_request_id == reservation.dropoff_request_id;
        if won {
            tracing::info!(
                dropoff_request_id = %reservation.dropoff_request_id,
                location_id = %reservation.location_id,
                "Reservation committed"
            );
            self.annotate(&store, &committed, &committed_reservation).await;
        } else {
            tracing::warn!(
                ours = %reservation.dropoff_request_id,
                committed = %committed_reservation.dropoff_request_id,
                "Concurrent allocation won; returning committed reservation"
            );
        }

        Ok(Allocation {
            order: committed,
            reservation: committed_reservation,
            created: won,
        })
    }

    async fn create_with_retry(
        &self,
        provider: &dyn LockerProvider,
        order: &PickupOrder,
        request: &DeliveryRequest,
    ) -> Result<CreatedDelivery, AllocationError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match provider.create_delivery(request).await {
                Ok(created) => return Ok(created),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(attempt, delay_ms = delay.as_millis(), error = %e, "Provider unavailable, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    let message = e.to_string();
                    tracing::error!(attempts = attempt, error = %message, "Allocation failed; pending retry");
                    self.store
                        .record_allocation_failure(order.id, attempt, &message)
                        .await?;
                    return Err(AllocationError::ProviderUnavailable {
                        attempts: attempt,
                        message,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn annotate(&self, store: &Store, order: &PickupOrder, reservation: &Reservation) {
        let Some(annotator) = &self.annotator else {
            return;
        };
        if let Err(e) = annotator
            .annotate_order(store, &order.external_order_id, &reservation.describe())
            .await
        {
            tracing::warn!(error = %e, order_id = %order.id, "Failed to annotate commerce order");
        }
    }
}
