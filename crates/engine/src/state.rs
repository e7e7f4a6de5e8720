//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::db::{PgPickupStore, PickupStore};
use crate::provider::{ProviderDirectory, ProviderResolver};
use crate::services::{
    AllocationService, EmailSender, EmailService, IngestionService, LifecycleService,
    NotificationDispatcher, RateQuoteResponder, SmsSender, SmsService,
};
use crate::shopify::{OrderAnnotator, ShopifyAnnotator};

/// Outbound HTTP calls give up after this long.
const OUTBOUND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Error assembling the application state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("SMTP: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// External collaborators, swappable for tests.
pub struct Collaborators {
    pub store: Arc<dyn PickupStore>,
    pub providers: Arc<dyn ProviderResolver>,
    pub annotator: Option<Arc<dyn OrderAnnotator>>,
    pub sms: Option<Arc<dyn SmsSender>>,
    pub email: Option<Arc<dyn EmailSender>>,
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: EngineConfig,
    store: Arc<dyn PickupStore>,
    allocation: AllocationService,
    lifecycle: LifecycleService,
    ingestion: IngestionService,
    rates: RateQuoteResponder,
    dispatcher: NotificationDispatcher,
}

impl AppState {
    /// Build the production state over a `PostgreSQL` pool.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if an HTTP client, URL or SMTP relay cannot be set up.
    pub fn new(config: EngineConfig, pool: PgPool) -> Result<Self, StateError> {
        let http = reqwest::Client::builder().timeout(OUTBOUND_TIMEOUT).build()?;

        let providers = ProviderDirectory::new(
            http.clone(),
            config.provider.base_url.clone(),
            config.provider.token_margin,
        )?;

        let sms = match &config.sms {
            Some(sms) => Some(Arc::new(SmsService::new(http.clone(), sms)?) as Arc<dyn SmsSender>),
            None => None,
        };
        let email = match &config.email {
            Some(email) => Some(Arc::new(EmailService::new(email)?) as Arc<dyn EmailSender>),
            None => None,
        };
        let annotator = ShopifyAnnotator::new(http, config.shopify_api_version.clone());

        Ok(Self::assemble(
            config,
            Collaborators {
                store: Arc::new(PgPickupStore::new(pool)),
                providers: Arc::new(providers),
                annotator: Some(Arc::new(annotator)),
                sms,
                email,
            },
        ))
    }

    /// Wire the services over the given collaborators.
    #[must_use]
    pub fn assemble(config: EngineConfig, parts: Collaborators) -> Self {
        let settings = &config.pickup;

        let dispatcher = NotificationDispatcher::new(
            Arc::clone(&parts.store),
            parts.sms,
            parts.email,
            settings.hold_period,
        );
        let lifecycle = LifecycleService::new(
            Arc::clone(&parts.store),
            dispatcher.clone(),
            settings.notification_policy(),
        );
        let allocation = AllocationService::new(
            Arc::clone(&parts.store),
            parts.providers,
            parts.annotator,
            settings.search,
            settings.retry,
        );
        let ingestion = IngestionService::new(Arc::clone(&parts.store), lifecycle.clone());
        let rates = RateQuoteResponder::new(Arc::clone(&parts.store), settings.rates.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store: parts.store,
                allocation,
                lifecycle,
                ingestion,
                rates,
                dispatcher,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn PickupStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn allocation(&self) -> &AllocationService {
        &self.inner.allocation
    }

    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleService {
        &self.inner.lifecycle
    }

    #[must_use]
    pub fn ingestion(&self) -> &IngestionService {
        &self.inner.ingestion
    }

    #[must_use]
    pub fn rates(&self) -> &RateQuoteResponder {
        &self.inner.rates
    }

    #[must_use]
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.inner.dispatcher
    }
}
