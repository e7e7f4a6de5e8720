//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ENGINE_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `PROVIDER_BASE_URL` - Locker-network provider API root
//!
//! ## Optional
//! - `ENGINE_HOST` - Bind address (default: 127.0.0.1)
//! - `ENGINE_PORT` - Listen port (default: 3002)
//! - `ENGINE_API_TOKEN` - Bearer token required on merchant routes
//! - `REQUEST_TIMEOUT_SECS` - Inbound request timeout (default: 30)
//! - `PROVIDER_WEBHOOK_SECRET` - Webhook signing secret (signatures unchecked if unset)
//! - `PROVIDER_TOKEN_MARGIN_SECS` - Refresh tokens this long before expiry (default: 60)
//! - `LOCKER_SEARCH_RADIUS_M` - Search radius in metres (default: 5000)
//! - `LOCKER_SEARCH_PAGE_LIMIT` - Provider page size (default: 50)
//! - `ALLOCATION_MAX_ATTEMPTS` - Attempts on provider outage (default: 3)
//! - `PICKUP_HOLD_DAYS` - Days a ready parcel is held (default: 5)
//! - `NOTIFY_ON_PICKUP_COMPLETED` - Send the "picked up" message (default: true)
//! - `RATE_QUOTE_COUNTRIES` - Comma-separated ISO country codes (default: US)
//! - `RATE_QUOTE_SERVICE_NAME` / `RATE_QUOTE_SERVICE_CODE` / `RATE_QUOTE_DESCRIPTION`
//! - `RATE_QUOTE_PRICE` - Rate amount (default: 0.00)
//! - `RATE_QUOTE_CURRENCY` - Rate currency (default: USD)
//! - `RATE_QUOTE_BUDGET_MS` - Rate quote deadline (default: 800)
//! - `SHOPIFY_API_VERSION` - Admin API version for order annotations (default: 2026-01)
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`
//!
//! ## Optional (email - all or none)
//! - `SMTP_HOST`, `SMTP_PORT` (default: 587), `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_FROM`
//!
//! ## Optional (SMS - all or none)
//! - `SMS_API_URL`, `SMS_ACCOUNT_SID`, `SMS_AUTH_TOKEN`, `SMS_FROM`

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use locker_pickup_core::{CurrencyCode, Price};
use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::services::lifecycle::NotificationPolicy;

const DEFAULT_SHOPIFY_API_VERSION: &str = "2026-01";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Bearer token for merchant routes; routes are open when unset
    pub api_token: Option<SecretString>,
    /// Inbound request timeout
    pub request_timeout: Duration,
    /// Locker-network provider settings
    pub provider: ProviderConfig,
    /// Pickup behaviour shared by the services
    pub pickup: PickupSettings,
    /// Shopify Admin API version used for order annotations
    pub shopify_api_version: String,
    /// SMTP settings (email notifications disabled when absent)
    pub email: Option<EmailConfig>,
    /// SMS gateway settings (SMS notifications disabled when absent)
    pub sms: Option<SmsConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Locker-network provider connection settings.
#[derive(Clone)]
pub struct ProviderConfig {
    /// API root; token, location and delivery paths are joined onto it
    pub base_url: Url,
    /// Shared secret for webhook signatures
    pub webhook_secret: Option<SecretString>,
    /// Tokens are refreshed this long before they expire
    pub token_margin: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url.as_str())
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_margin", &self.token_margin)
            .finish()
    }
}

/// Locker search bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSettings {
    /// Search radius in metres
    pub radius_m: u32,
    /// Maximum locations requested from the provider
    pub page_limit: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            radius_m: 5_000,
            page_limit: 50,
        }
    }
}

/// Backoff for provider outages during allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure
    pub base_delay: Duration,
}

impl RetrySettings {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// What the checkout carrier-service callback offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateQuoteSettings {
    /// Destination countries (ISO 3166-1 alpha-2, upper case)
    pub countries: Vec<String>,
    /// Rate title shown at checkout
    pub service_name: String,
    /// Rate code reported back on the order
    pub service_code: String,
    /// Rate subtitle shown at checkout
    pub description: String,
    /// Rate price
    pub price: Price,
    /// Hard deadline for answering
    pub budget: Duration,
}

impl Default for RateQuoteSettings {
    fn default() -> Self {
        Self {
            countries: vec!["US".to_string()],
            service_name: "Locker pickup".to_string(),
            service_code: "LOCKER_PICKUP".to_string(),
            description: "Collect from a secure locker near you".to_string(),
            price: Price::free(CurrencyCode::USD),
            budget: Duration::from_millis(800),
        }
    }
}

/// Behaviour shared by allocation, lifecycle and rate quoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickupSettings {
    pub search: SearchSettings,
    pub retry: RetrySettings,
    /// How long a ready parcel is held before the sweep expires it
    pub hold_period: chrono::Duration,
    pub notify_on_pickup_completed: bool,
    pub rates: RateQuoteSettings,
}

impl PickupSettings {
    /// Which transitions owe the customer a message.
    #[must_use]
    pub const fn notification_policy(&self) -> NotificationPolicy {
        NotificationPolicy {
            picked_up: self.notify_on_pickup_completed,
        }
    }
}

impl Default for PickupSettings {
    fn default() -> Self {
        Self {
            search: SearchSettings::default(),
            retry: RetrySettings::default(),
            hold_period: chrono::Duration::days(5),
            notify_on_pickup_completed: true,
            rates: RateQuoteSettings::default(),
        }
    }
}

/// SMTP settings for pickup emails.
#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: SecretString,
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// Twilio-compatible SMS gateway settings.
#[derive(Clone)]
pub struct SmsConfig {
    /// Gateway root, e.g. `https://api.twilio.com/2010-04-01`
    pub api_url: Url,
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Sender number in E.164 form
    pub from_number: String,
}

impl std::fmt::Debug for SmsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsConfig")
            .field("api_url", &self.api_url.as_str())
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("from_number", &self.from_number)
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required environment variables are missing
    /// or any value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = get_env_or_default("ENGINE_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("ENGINE_HOST".to_string(), e.to_string()))?;

        Ok(Self {
            database_url: get_database_url("ENGINE_DATABASE_URL")?,
            host,
            port: parse_env_or("ENGINE_PORT", 3002)?,
            api_token: get_optional_env("ENGINE_API_TOKEN").map(SecretString::from),
            request_timeout: Duration::from_secs(parse_env_or("REQUEST_TIMEOUT_SECS", 30)?),
            provider: ProviderConfig::from_env()?,
            pickup: PickupSettings::from_env()?,
            shopify_api_version: get_env_or_default(
                "SHOPIFY_API_VERSION",
                DEFAULT_SHOPIFY_API_VERSION,
            ),
            email: EmailConfig::from_env()?,
            sms: SmsConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_env_or("SENTRY_SAMPLE_RATE", 1.0)?,
            sentry_traces_sample_rate: parse_env_or("SENTRY_TRACES_SAMPLE_RATE", 0.1)?,
        })
    }

    /// Get the socket address to bind to.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Configuration for in-process tests: default pickup settings, no
    /// notification channels, no Sentry.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn for_tests(provider_base_url: Url) -> Self {
        Self {
            database_url: SecretString::from("postgres://localhost/locker_pickup_test"),
            host: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            api_token: None,
            request_timeout: Duration::from_secs(5),
            provider: ProviderConfig {
                base_url: provider_base_url,
                webhook_secret: None,
                token_margin: Duration::from_secs(60),
            },
            pickup: PickupSettings::default(),
            shopify_api_version: DEFAULT_SHOPIFY_API_VERSION.to_string(),
            email: None,
            sms: None,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 0.0,
            sentry_traces_sample_rate: 0.0,
        }
    }
}

impl ProviderConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw = get_required_env("PROVIDER_BASE_URL")?;
        let base_url = parse_base_url("PROVIDER_BASE_URL", &raw)?;

        Ok(Self {
            base_url,
            webhook_secret: get_optional_env("PROVIDER_WEBHOOK_SECRET").map(SecretString::from),
            token_margin: Duration::from_secs(parse_env_or("PROVIDER_TOKEN_MARGIN_SECS", 60)?),
        })
    }
}

impl PickupSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_attempts: u32 = parse_env_or("ALLOCATION_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "ALLOCATION_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let hold_days: i64 = parse_env_or("PICKUP_HOLD_DAYS", 5)?;
        if hold_days <= 0 {
            return Err(ConfigError::InvalidEnvVar(
                "PICKUP_HOLD_DAYS".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(Self {
            search: SearchSettings {
                radius_m: parse_env_or("LOCKER_SEARCH_RADIUS_M", defaults.search.radius_m)?,
                page_limit: parse_env_or("LOCKER_SEARCH_PAGE_LIMIT", defaults.search.page_limit)?,
            },
            retry: RetrySettings {
                max_attempts,
                ..defaults.retry
            },
            hold_period: chrono::Duration::days(hold_days),
            notify_on_pickup_completed: parse_env_or("NOTIFY_ON_PICKUP_COMPLETED", true)?,
            rates: RateQuoteSettings::from_env(defaults.rates)?,
        })
    }
}

impl RateQuoteSettings {
    fn from_env(defaults: Self) -> Result<Self, ConfigError> {
        let countries = get_optional_env("RATE_QUOTE_COUNTRIES").map_or(defaults.countries, |raw| {
            parse_country_list(&raw)
        });
        let amount: Decimal = parse_env_or("RATE_QUOTE_PRICE", Decimal::ZERO)?;
        let currency: CurrencyCode = parse_env_or("RATE_QUOTE_CURRENCY", CurrencyCode::USD)?;

        Ok(Self {
            countries,
            service_name: get_env_or_default("RATE_QUOTE_SERVICE_NAME", &defaults.service_name),
            service_code: get_env_or_default("RATE_QUOTE_SERVICE_CODE", &defaults.service_code),
            description: get_env_or_default("RATE_QUOTE_DESCRIPTION", &defaults.description),
            price: Price::new(amount, currency),
            budget: Duration::from_millis(parse_env_or("RATE_QUOTE_BUDGET_MS", 800)?),
        })
    }
}

impl EmailConfig {
    /// Returns `None` when no SMTP variable is set. A partial set is an error.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let keys = ["SMTP_HOST", "SMTP_USERNAME", "SMTP_PASSWORD", "SMTP_FROM"];
        if !require_all_or_none(&keys)? {
            return Ok(None);
        }

        Ok(Some(Self {
            smtp_host: get_required_env("SMTP_HOST")?,
            smtp_port: parse_env_or("SMTP_PORT", 587)?,
            smtp_username: get_required_env("SMTP_USERNAME")?,
            smtp_password: get_required_secret("SMTP_PASSWORD")?,
            from_address: get_required_env("SMTP_FROM")?,
        }))
    }
}

impl SmsConfig {
    /// Returns `None` when no SMS variable is set. A partial set is an error.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let keys = ["SMS_API_URL", "SMS_ACCOUNT_SID", "SMS_AUTH_TOKEN", "SMS_FROM"];
        if !require_all_or_none(&keys)? {
            return Ok(None);
        }

        let raw = get_required_env("SMS_API_URL")?;
        Ok(Some(Self {
            api_url: parse_base_url("SMS_API_URL", &raw)?,
            account_sid: get_required_env("SMS_ACCOUNT_SID")?,
            auth_token: get_required_secret("SMS_AUTH_TOKEN")?,
            from_number: get_required_env("SMS_FROM")?,
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an optional environment variable, falling back to `default` when unset.
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Returns true if every key is set, false if none is. Anything in between is an error.
fn require_all_or_none(keys: &[&str]) -> Result<bool, ConfigError> {
    let missing: Vec<&str> = keys
        .iter()
        .copied()
        .filter(|key| get_optional_env(key).is_none())
        .collect();

    match missing.len() {
        0 => Ok(true),
        n if n == keys.len() => Ok(false),
        _ => Err(ConfigError::InvalidEnvVar(
            missing.join(", "),
            format!("must be set together with {}", keys.join(", ")),
        )),
    }
}

/// Parse a base URL, ensuring a trailing slash so relative joins keep the path.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_country_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|code| code.trim().to_ascii_uppercase())
        .filter(|code| !code.is_empty())
        .collect()
}
