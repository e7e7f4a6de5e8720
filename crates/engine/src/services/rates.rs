//! Checkout rate quotes.
//!
//! The carrier-service callback must answer fast and must never break
//! checkout. Every failure path answers with an empty rate list. The provider
//! is never called; store availability comes from a short-lived cache.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::RateQuoteSettings;
use crate::db::{PickupStore, RepositoryError};

const AVAILABILITY_TTL: Duration = Duration::from_secs(5 * 60);
const MAX_CACHED_SHOPS: u64 = 10_000;

/// Rate-quote request body.
#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub rate: RateRequestDetails,
}

#[derive(Debug, Deserialize)]
pub struct RateRequestDetails {
    pub destination: Destination,
    #[serde(default)]
    pub items: Vec<RateItem>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Destination {
    pub country: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RateItem {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub grams: u64,
    #[serde(default)]
    pub price: u64,
    #[serde(default = "default_requires_shipping")]
    pub requires_shipping: bool,
}

const fn default_requires_shipping() -> bool {
    true
}

/// One offered rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippingRate {
    pub service_name: String,
    pub service_code: String,
    /// Minor units, as a string.
    pub total_price: String,
    pub currency: String,
    pub description: String,
}

/// Rate-quote response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateResponse {
    pub rates: Vec<ShippingRate>,
}

impl RateResponse {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// Why no rate was offered.
enum Decline {
    Unparseable(String),
    MissingShop,
    OutsideServiceArea(String),
    NothingToShip,
    Unavailable,
    Repository(Arc<RepositoryError>),
}

impl Decline {
    fn reason(&self) -> String {
        match self {
            Self::Unparseable(e) => format!("unparseable request: {e}"),
            Self::MissingShop => "missing shop domain".to_string(),
            Self::OutsideServiceArea(country) => format!("destination {country} not served"),
            Self::NothingToShip => "no item requires shipping".to_string(),
            Self::Unavailable => "store inactive or without enabled locations".to_string(),
            Self::Repository(e) => e.to_string(),
        }
    }
}

/// Answers checkout rate requests for locker pickup.
#[derive(Clone)]
pub struct RateQuoteResponder {
    store: Arc<dyn PickupStore>,
    settings: RateQuoteSettings,
    /// Shop domain to "active with at least one enabled location".
    availability: Cache<String, bool>,
}

impl RateQuoteResponder {
    #[must_use]
    pub fn new(store: Arc<dyn PickupStore>, settings: RateQuoteSettings) -> Self {
        Self {
            store,
            settings,
            availability: Cache::builder()
                .max_capacity(MAX_CACHED_SHOPS)
                .time_to_live(AVAILABILITY_TTL)
                .build(),
        }
    }

    /// Quote for a checkout. Always returns a response, empty when locker
    /// pickup is not offered or the budget runs out.
    #[instrument(skip(self, body))]
    pub async fn quote(&self, shop: Option<&str>, body: &[u8]) -> RateResponse {
        match tokio::time::timeout(self.settings.budget, self.compute(shop, body)).await {
            Ok(Ok(rate)) => RateResponse { rates: vec![rate] },
            Ok(Err(decline)) => {
                if matches!(decline, Decline::Repository(_)) {
                    tracing::error!(error = %decline.reason(), "Rate quote lookup failed");
                } else {
                    tracing::debug!(reason = %decline.reason(), "No locker rate offered");
                }
                RateResponse::none()
            }
            Err(_) => {
                tracing::warn!(budget_ms = self.settings.budget.as_millis(), "Rate quote budget exceeded");
                RateResponse::none()
            }
        }
    }

    async fn compute(&self, shop: Option<&str>, body: &[u8]) -> Result<ShippingRate, Decline> {
        let request: RateRequest =
            serde_json::from_slice(body).map_err(|e| Decline::Unparseable(e.to_string()))?;
        let shop = shop
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(Decline::MissingShop)?;

        let country = request.rate.destination.country.trim().to_ascii_uppercase();
        if !self.settings.countries.iter().any(|c| *c == country) {
            return Err(Decline::OutsideServiceArea(country));
        }

        if !request.rate.items.iter().any(|item| item.requires_shipping) {
            return Err(Decline::NothingToShip);
        }

        if !self.is_available(shop).await? {
            return Err(Decline::Unavailable);
        }

        let price = self.settings.price;
        Ok(ShippingRate {
            service_name: self.settings.service_name.clone(),
            service_code: self.settings.service_code.clone(),
            total_price: price.minor_units().to_string(),
            currency: price.currency_code.to_string(),
            description: self.settings.description.clone(),
        })
    }

    async fn is_available(&self, shop: &str) -> Result<bool, Decline> {
        let store = Arc::clone(&self.store);
        let key = shop.to_string();
        self.availability
            .try_get_with(key.clone(), async move {
                let Some(install) = store.store_by_shop(&key).await? else {
                    return Ok::<_, RepositoryError>(false);
                };
                if !install.is_active() {
                    return Ok(false);
                }
                Ok(!store.enabled_preferences(install.id).await?.is_empty())
            })
            .await
            .map_err(Decline::Repository)
    }
}
