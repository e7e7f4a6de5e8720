//! Provider bearer tokens.
//!
//! Tokens come from an OAuth2 client-credentials exchange and are cached per
//! store until `margin` before they expire. Concurrent callers that find the
//! cache stale share a single in-flight exchange.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;
use url::Url;

/// Errors from obtaining a provider token.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// The provider refused the client credentials.
    #[error("credential exchange rejected: {0}")]
    Rejected(String),

    /// The token endpoint could not be reached or failed.
    #[error("token endpoint unavailable: {0}")]
    Transport(String),

    /// The token response was not understood.
    #[error("malformed token response: {0}")]
    Malformed(String),
}

/// A token as issued by the provider.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: SecretString,
    /// Lifetime from the moment of issue.
    pub expires_in: Duration,
}

/// Performs one credential exchange. No caching, no retry.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self) -> Result<IssuedToken, CredentialError>;
}

/// Source of bearer tokens for provider calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A token valid for at least the safety margin.
    async fn get_token(&self) -> Result<SecretString, CredentialError>;

    /// Drop the cached token, e.g. after the provider answered 401.
    async fn invalidate(&self);
}

/// Request body for the client-credentials grant.
#[derive(serde::Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// Response from the token endpoint.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    expires_in: i64,
}

/// Error response from the token endpoint.
#[derive(Deserialize, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client-credentials exchange against the provider's token endpoint.
///
/// Implements `Debug` manually to redact the client secret.
pub struct ClientCredentialsExchange {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: SecretString,
}

impl std::fmt::Debug for ClientCredentialsExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsExchange")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsExchange {
    #[must_use]
    pub const fn new(
        http: reqwest::Client,
        token_url: Url,
        client_id: String,
        client_secret: SecretString,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl TokenExchange for ClientCredentialsExchange {
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    async fn exchange(&self) -> Result<IssuedToken, CredentialError> {
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&TokenRequest {
                grant_type: "client_credentials",
                client_id: &self.client_id,
                client_secret: self.client_secret.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CredentialError::Transport(format!("token endpoint returned {status}")));
        }
        if !status.is_success() {
            let body: TokenErrorResponse = response.json().await.unwrap_or_default();
            let message = body
                .error_description
                .or(body.error)
                .unwrap_or_else(|| status.to_string());
            tracing::warn!(status = status.as_u16(), "Provider rejected client credentials");
            return Err(CredentialError::Rejected(message));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        let expires_in = u64::try_from(body.expires_in)
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                CredentialError::Malformed(format!("expires_in must be positive, got {}", body.expires_in))
            })?;

        tracing::debug!(expires_in, "Provider token issued");

        Ok(IssuedToken {
            access_token: SecretString::from(body.access_token),
            expires_in: Duration::from_secs(expires_in),
        })
    }
}

#[derive(Clone)]
struct CachedToken {
    access_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now < self.expires_at - margin
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<SecretString, CredentialError>>>;

/// Caches one provider token and refreshes it single-flight.
pub struct CredentialCache {
    exchange: Arc<dyn TokenExchange>,
    margin: chrono::Duration,
    token: Arc<RwLock<Option<CachedToken>>>,
    refresh: Mutex<Option<RefreshFuture>>,
}

impl CredentialCache {
    /// Create an empty cache. The first `get_token` performs an exchange.
    #[must_use]
    pub fn new(exchange: Arc<dyn TokenExchange>, margin: Duration) -> Self {
        Self {
            exchange,
            margin: chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::seconds(60)),
            token: Arc::new(RwLock::new(None)),
            refresh: Mutex::new(None),
        }
    }

    async fn fresh_token(&self) -> Option<SecretString> {
        let now = Utc::now();
        self.token
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_fresh(now, self.margin))
            .map(|token| token.access_token.clone())
    }

    fn start_refresh(&self) -> RefreshFuture {
        let exchange = Arc::clone(&self.exchange);
        let slot = Arc::clone(&self.token);

        async move {
            let issued = exchange.exchange().await?;
            let lifetime = chrono::Duration::from_std(issued.expires_in).unwrap_or_else(|_| chrono::Duration::zero());
            *slot.write().await = Some(CachedToken {
                access_token: issued.access_token.clone(),
                expires_at: Utc::now() + lifetime,
            });
            Ok(issued.access_token)
        }
        .boxed()
        .shared()
    }
}

#[async_trait]
impl TokenProvider for CredentialCache {
    async fn get_token(&self) -> Result<SecretString, CredentialError> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let refresh = {
            let mut in_flight = self.refresh.lock().await;

            // Another caller may have refreshed while we waited for the lock.
            if let Some(token) = self.fresh_token().await {
                return Ok(token);
            }

            match in_flight.as_ref() {
                Some(pending) if pending.peek().is_none() => pending.clone(),
                _ => {
                    let started = self.start_refresh();
                    *in_flight = Some(started.clone());
                    started
                }
            }
        };

        refresh.await
    }

    async fn invalidate(&self) {
        *self.token.write().await = None;
    }
}
