//! HTTP route handlers for the engine.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                          - Liveness
//! GET  /health/ready                    - Readiness (database ping)
//!
//! # Provider and checkout callbacks (no bearer token)
//! POST /webhooks/provider               - Locker event ingestion
//! POST /carrier/rates                   - Checkout rate quote, always 200
//!
//! # Merchant API (bearer token when ENGINE_API_TOKEN is set)
//! GET  /lockers/search                  - Ranked locker candidates
//! POST /orders                          - Create a pickup order
//! GET  /orders/{id}                     - Order with its event log
//! POST /orders/{id}/allocate            - Reserve a drop-off at a location
//! POST /orders/{id}/cancel              - Merchant cancel
//!
//! # Dashboard
//! GET  /dashboard/stuck                 - Orders without a committed allocation
//! GET  /dashboard/orders                - Orders of a shop in one status
//! ```

pub mod dashboard;
pub mod lockers;
pub mod orders;
pub mod rates;
pub mod webhooks;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::middleware::{request_id_middleware, require_api_token};
use crate::state::AppState;

/// All API routes, without health checks or outer layers.
pub fn routes(state: &AppState) -> Router<AppState> {
    let merchant = Router::new()
        .merge(lockers::router())
        .merge(orders::router())
        .merge(dashboard::router())
        .route_layer(from_fn_with_state(state.clone(), require_api_token));

    Router::new()
        .merge(webhooks::router())
        .merge(rates::router())
        .merge(merchant)
}

/// The full application: health checks, routes, timeout, request IDs and
/// request tracing.
///
/// Sentry layers are added by the binary on top of this.
pub fn app(state: AppState) -> Router {
    let request_timeout = state.config().request_timeout;

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes(&state))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;
    use url::Url;

    use locker_pickup_core::{CustomerContact, OrderId, SizeClass};

    use crate::config::EngineConfig;
    use crate::db::{MemoryStore, PickupStore};
    use crate::models::{NewOrder, Reservation};
    use crate::provider::{ProviderDirectory, ProviderResolver};
    use crate::state::{AppState, Collaborators};

    /// Config pointing the provider at `base` (a mock server, or nothing).
    pub fn config(base: &str) -> EngineConfig {
        let base = Url::parse(base).expect("provider url");
        EngineConfig::for_tests(base)
    }

    /// State over an in-memory store, a real provider directory and no
    /// notification channels.
    pub fn state(store: &Arc<MemoryStore>, config: EngineConfig) -> AppState {
        let directory = ProviderDirectory::new(
            reqwest::Client::new(),
            config.provider.base_url.clone(),
            config.provider.token_margin,
        )
        .expect("directory");

        AppState::assemble(
            config,
            Collaborators {
                store: Arc::clone(store) as Arc<dyn PickupStore>,
                providers: Arc::new(directory) as Arc<dyn ProviderResolver>,
                annotator: None,
                sms: None,
                email: None,
            },
        )
    }

    /// A store with `loc-1` approved and an order holding drop-off `dr-1` there.
    pub async fn reserved_order(store: &MemoryStore, shop: &str) -> OrderId {
        let install = store.insert_store(shop, "cid", "secret").await;
        store.insert_preference(install.id, "loc-1", "Main St", true).await;
        let order = store
            .create_order(NewOrder {
                store_id: install.id,
                external_order_id: "A-100".to_string(),
                customer: CustomerContact::default(),
                required_size: SizeClass::Small,
            })
            .await
            .expect("order")
            .order;
        store
            .commit_reservation(
                order.id,
                &Reservation {
                    location_id: "loc-1".to_string(),
                    location_name: "Main St".to_string(),
                    compartment_id: Some("B4".to_string()),
                    dropoff_request_id: "dr-1".to_string(),
                    dropoff_link: "https://l.test/dr-1".to_string(),
                },
            )
            .await
            .expect("reserve");
        order.id
    }

    /// Send one request and decode a JSON body (`Null` when empty or not JSON).
    pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    pub fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::{config, get, send, state};
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn test_health_and_readiness() {
        let store = Arc::new(MemoryStore::new());
        let app = app(state(&store, config("http://provider.invalid/")));

        let (status, _) = send(app.clone(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(app, get("/health/ready")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_responses_carry_request_id() {
        let store = Arc::new(MemoryStore::new());
        let app = app(state(&store, config("http://provider.invalid/")));

        let response = tower::ServiceExt::oneshot(app, get("/health"))
            .await
            .expect("response");
        assert!(
            response
                .headers()
                .contains_key(crate::middleware::REQUEST_ID_HEADER)
        );
    }

    #[tokio::test]
    async fn test_merchant_routes_require_token_when_configured() {
        let store = Arc::new(MemoryStore::new());
        let mut config = config("http://provider.invalid/");
        config.api_token = Some(secrecy::SecretString::from("s3cret"));
        let app = app(state(&store, config));

        let (status, body) = send(app.clone(), get("/dashboard/stuck")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        // Checkout callbacks stay open.
        let (status, body) = send(
            app,
            testing::post_json("/carrier/rates", &serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"rates": []}));
    }
}
