//! One provider client per store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use url::Url;

use locker_pickup_core::StoreId;

use super::auth::{ClientCredentialsExchange, CredentialCache};
use super::{LockerProvider, ProviderClient, ProviderError};
use crate::models::Store;

/// Idle clients are dropped after this long; their token goes with them.
const CLIENT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

const MAX_CLIENTS: u64 = 10_000;

/// Finds the provider client for a store.
#[async_trait]
pub trait ProviderResolver: Send + Sync {
    /// Client authenticated with the store's own provider credentials.
    async fn provider_for(&self, store: &Store) -> Result<Arc<dyn LockerProvider>, ProviderError>;
}

/// Memoises a [`ProviderClient`] and its [`CredentialCache`] per store.
///
/// The key includes the client id so rotated credentials get a fresh cache.
#[derive(Clone)]
pub struct ProviderDirectory {
    http: reqwest::Client,
    base_url: Url,
    token_url: Url,
    token_margin: Duration,
    clients: Cache<(StoreId, String), Arc<ProviderClient>>,
}

impl ProviderDirectory {
    /// Create a directory for the provider at `base_url` (ending with `/`).
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if the token endpoint cannot be derived.
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        token_margin: Duration,
    ) -> Result<Self, url::ParseError> {
        let token_url = base_url.join("oauth/token")?;
        Ok(Self {
            http,
            base_url,
            token_url,
            token_margin,
            clients: Cache::builder()
                .max_capacity(MAX_CLIENTS)
                .time_to_idle(CLIENT_IDLE_TTL)
                .build(),
        })
    }

    fn build_client(&self, store: &Store) -> Arc<ProviderClient> {
        let exchange = ClientCredentialsExchange::new(
            self.http.clone(),
            self.token_url.clone(),
            store.provider_client_id.clone(),
            store.provider_client_secret.clone(),
        );
        let tokens = CredentialCache::new(Arc::new(exchange), self.token_margin);

        tracing::debug!(shop = %store.shop, "Created provider client");
        Arc::new(ProviderClient::new(
            self.http.clone(),
            self.base_url.clone(),
            Arc::new(tokens),
        ))
    }
}

#[async_trait]
impl ProviderResolver for ProviderDirectory {
    async fn provider_for(&self, store: &Store) -> Result<Arc<dyn LockerProvider>, ProviderError> {
        let key = (store.id, store.provider_client_id.clone());
        let client: Arc<dyn LockerProvider> = self
            .clients
            .get_with(key, async { self.build_client(store) })
            .await;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use secrecy::SecretString;

    use super::*;

    fn store(client_id: &str) -> Store {
        Store {
            id: StoreId::new(1),
            shop: "acme.myshopify.com".to_string(),
            provider_client_id: client_id.to_string(),
            provider_client_secret: SecretString::from("secret"),
            commerce_access_token: None,
            installed_at: Utc::now(),
            disabled_at: None,
        }
    }

    #[tokio::test]
    async fn test_client_is_memoised_per_credentials() {
        let directory = ProviderDirectory::new(
            reqwest::Client::new(),
            Url::parse("https://lockers.test/api/").expect("url"),
            Duration::from_secs(60),
        )
        .expect("directory");

        let a = directory.provider_for(&store("cid-1")).await.expect("client");
        let b = directory.provider_for(&store("cid-1")).await.expect("client");
        let rotated = directory.provider_for(&store("cid-2")).await.expect("client");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &rotated));
    }

    #[test]
    fn test_token_url_keeps_base_path() {
        let directory = ProviderDirectory::new(
            reqwest::Client::new(),
            Url::parse("https://lockers.test/api/").expect("url"),
            Duration::from_secs(60),
        )
        .expect("directory");
        assert_eq!(directory.token_url.as_str(), "https://lockers.test/api/oauth/token");
    }
}
