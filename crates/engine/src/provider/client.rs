//! REST client for the locker-network provider.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use locker_pickup_core::SizeClass;

use super::auth::TokenProvider;
use super::{
    CreatedDelivery, DeliveryRequest, LocationQuery, LockerProvider, ProviderError,
    ProviderLocation,
};

/// Provider API client for one store's credentials.
///
/// Cheap to clone; clones share the HTTP connection pool and token cache.
#[derive(Clone)]
pub struct ProviderClient {
    inner: Arc<ProviderClientInner>,
}

struct ProviderClientInner {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

#[derive(Deserialize)]
struct LocationsResponse {
    #[serde(default)]
    locations: Vec<ProviderLocation>,
}

#[derive(Serialize)]
struct DeliveryBody<'a> {
    location_id: &'a str,
    kind: &'static str,
    reference: &'a str,
    size: SizeClass,
    recipient: RecipientBody<'a>,
}

#[derive(Serialize)]
struct RecipientBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
}

/// Error body returned by the provider.
#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ProviderClient {
    /// Create a client. `base_url` must end with `/`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: Url, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            inner: Arc::new(ProviderClientInner {
                http,
                base_url,
                tokens,
            }),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|e| ProviderError::Decode(format!("invalid endpoint {path}: {e}")))
    }

    /// Map non-success statuses to errors. 401 also drops the cached token
    /// so the next call re-authenticates.
    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(ProviderError::Unavailable(match retry_after {
                Some(secs) => format!("{status}, retry after {secs}s"),
                None => status.to_string(),
            }));
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.inner.tokens.invalidate().await;
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            message: body
                .message
                .or(body.error)
                .unwrap_or_else(|| status.to_string()),
        })
    }
}

#[async_trait]
impl LockerProvider for ProviderClient {
    #[instrument(skip(self), fields(lat = query.near.lat(), lon = query.near.lon()))]
    async fn search_locations(
        &self,
        query: &LocationQuery,
    ) -> Result<Vec<ProviderLocation>, ProviderError> {
        let token = self.inner.tokens.get_token().await?;

        let mut url = self.endpoint("v1/locations")?;
        url.query_pairs_mut()
            .append_pair("lat", &query.near.lat().to_string())
            .append_pair("lon", &query.near.lon().to_string())
            .append_pair("radius_m", &query.radius_m.to_string())
            .append_pair("limit", &query.limit.to_string());

        let response = self
            .inner
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;

        let body: LocationsResponse = self.check(response).await?.json().await?;
        tracing::debug!(count = body.locations.len(), "Provider locations fetched");
        Ok(body.locations)
    }

    #[instrument(skip(self, request), fields(location_id = %request.location_id, reference = %request.reference))]
    async fn create_delivery(
        &self,
        request: &DeliveryRequest,
    ) -> Result<CreatedDelivery, ProviderError> {
        let token = self.inner.tokens.get_token().await?;

        let body = DeliveryBody {
            location_id: &request.location_id,
            kind: "dropoff",
            reference: &request.reference,
            size: request.size,
            recipient: RecipientBody {
                name: &request.recipient.name,
                email: request.recipient.email.as_ref().map(|e| e.as_str()),
                phone: request.recipient.phone.as_ref().map(|p| p.as_str()),
            },
        };

        let response = self
            .inner
            .http
            .post(self.endpoint("v1/deliveries")?)
            .bearer_auth(token.expose_secret())
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await?;

        let created: CreatedDelivery = self.check(response).await?.json().await?;
        tracing::info!(delivery_id = %created.id, "Drop-off delivery created");
        Ok(created)
    }
}
