//! Scenario tests for the locker pickup engine.
//!
//! Each test drives the real HTTP router over an in-memory store, with the
//! locker provider and the SMS gateway played by `wiremock` servers.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p locker-pickup-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `pickup_lifecycle` - Event ingestion, ordering, duplicates, notifications
//! - `allocation` - Idempotent reservations and provider failures
//! - `rate_quotes` - Checkout callback behaviour

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use locker_pickup_core::{OrderId, PickupStatus};
use locker_pickup_engine::config::{EngineConfig, SmsConfig};
use locker_pickup_engine::db::{MemoryStore, PickupStore};
use locker_pickup_engine::models::{PickupOrder, Store};
use locker_pickup_engine::provider::{ProviderDirectory, ProviderResolver};
use locker_pickup_engine::routes;
use locker_pickup_engine::services::{SmsSender, SmsService};
use locker_pickup_engine::state::{AppState, Collaborators};
use secrecy::SecretString;
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SHOP: &str = "acme.myshopify.com";
pub const LOCATION: &str = "loc-1";
pub const CUSTOMER_PHONE: &str = "+14155550123";

/// One engine wired to mock collaborators.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provider: MockServer,
    pub sms_gateway: MockServer,
    pub state: AppState,
    pub app: Router,
}

impl Harness {
    /// Engine with default settings, fast retries and SMS enabled.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Engine with settings adjusted by `configure`.
    pub async fn start_with(configure: impl FnOnce(&mut EngineConfig)) -> Self {
        let provider = MockServer::start().await;
        let sms_gateway = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/Accounts/[^/]+/Messages\.json$"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "SM1"})))
            .mount(&sms_gateway)
            .await;

        let mut config = EngineConfig::for_tests(base_url(&provider));
        config.pickup.retry.base_delay = Duration::from_millis(1);
        config.sms = Some(SmsConfig {
            api_url: base_url(&sms_gateway),
            account_sid: "AC-test".to_string(),
            auth_token: SecretString::from("sms-secret"),
            from_number: "+15005550006".to_string(),
        });
        configure(&mut config);

        let http = reqwest::Client::new();
        let directory = ProviderDirectory::new(
            http.clone(),
            config.provider.base_url.clone(),
            config.provider.token_margin,
        )
        .expect("provider directory");
        let sms = config
            .sms
            .as_ref()
            .map(|sms| Arc::new(SmsService::new(http, sms).expect("sms service")) as Arc<dyn SmsSender>);

        let store = Arc::new(MemoryStore::new());
        let state = AppState::assemble(
            config,
            Collaborators {
                store: Arc::clone(&store) as Arc<dyn PickupStore>,
                providers: Arc::new(directory) as Arc<dyn ProviderResolver>,
                annotator: None,
                sms,
                email: None,
            },
        );
        let app = routes::app(state.clone());

        Self {
            store,
            provider,
            sms_gateway,
            state,
            app,
        }
    }

    /// Install [`SHOP`] with [`LOCATION`] approved.
    pub async fn install_shop(&self) -> Store {
        let store = self.store.insert_store(SHOP, "client-1", "client-secret").await;
        self.store
            .insert_preference(store.id, LOCATION, "Main St Lockers", true)
            .await;
        store
    }

    /// Token endpoint that always issues a token.
    pub async fn mount_token(&self) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 3600
            })))
            .mount(&self.provider)
            .await;
    }

    /// Delivery create that answers with drop-off `dropoff_id`, expected
    /// exactly `times` times.
    pub async fn mount_delivery(&self, dropoff_id: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/deliveries"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": dropoff_id,
                "access_link": format!("https://lockers.test/dropoff/{dropoff_id}"),
                "compartment_id": "B4"
            })))
            .expect(times)
            .mount(&self.provider)
            .await;
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: &serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.send(post_json(uri, body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
    }

    /// Create an order for a customer reachable by SMS.
    pub async fn create_order(&self, external_order_id: &str) -> OrderId {
        let (status, body) = self
            .post(
                "/orders",
                &serde_json::json!({
                    "shop": SHOP,
                    "external_order_id": external_order_id,
                    "customer": {"name": "Ada", "email": null, "phone": CUSTOMER_PHONE},
                    "item_sizes": ["small"]
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create order: {body}");
        let id = body["id"].as_i64().expect("order id");
        OrderId::new(id)
    }

    /// Allocate at [`LOCATION`], asserting success.
    pub async fn allocate(&self, order_id: OrderId) -> serde_json::Value {
        let (status, body) = self
            .post(
                &format!("/orders/{order_id}/allocate"),
                &serde_json::json!({"location_id": LOCATION}),
            )
            .await;
        assert!(status.is_success(), "allocate: {status} {body}");
        body
    }

    /// Deliver a provider webhook.
    pub async fn webhook(&self, body: &serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.post("/webhooks/provider", body).await
    }

    pub async fn order(&self, id: OrderId) -> PickupOrder {
        self.store.order(id).await.expect("load").expect("order")
    }

    pub async fn status(&self, id: OrderId) -> PickupStatus {
        self.order(id).await.status
    }

    /// Text messages the gateway received.
    pub async fn sms_sent(&self) -> usize {
        self.sms_gateway
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }
}

/// Provider event body.
pub fn event(delivery_id: &str, event_type: &str, occurred_at: &str) -> serde_json::Value {
    serde_json::json!({
        "delivery_id": delivery_id,
        "event_type": event_type,
        "occurred_at": occurred_at
    })
}

pub fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn base_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/", server.uri())).expect("mock server url")
}
