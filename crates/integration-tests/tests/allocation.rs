//! Allocation scenarios against a mocked locker provider.

use axum::http::StatusCode;
use locker_pickup_core::PickupStatus;
use locker_pickup_integration_tests::{Harness, LOCATION};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test]
async fn test_allocating_twice_creates_one_delivery() {
    let h = Harness::start().await;
    h.install_shop().await;
    h.mount_token().await;
    Mock::given(method("POST"))
        .and(path("/v1/deliveries"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "dr-9",
            "access_link": "https://lockers.test/dropoff/dr-9",
            "compartment_id": "B4"
        })))
        .expect(1)
        .mount(&h.provider)
        .await;

    let order_id = h.create_order("1001").await;
    let first = h.allocate(order_id).await;
    let second = h.allocate(order_id).await;

    assert_eq!(first["created"], true);
    assert_eq!(second["created"], false);
    assert_eq!(first["reservation"], second["reservation"]);
    assert_eq!(first["reservation"]["dropoff_link"], "https://lockers.test/dropoff/dr-9");

    let order = h.order(order_id).await;
    assert_eq!(order.dropoff_request_id.as_deref(), Some("dr-9"));
    assert_eq!(order.location_id.as_deref(), Some(LOCATION));
    assert!(order.allocated_at.is_some());

    // The idempotency key is derived from the order, so a retried call after
    // a lost response cannot reserve a second compartment.
    let requests = h.provider.received_requests().await.expect("recording");
    let create = requests
        .iter()
        .find(|r| r.url.path() == "/v1/deliveries")
        .expect("delivery create");
    assert_eq!(
        create.headers.get("idempotency-key").and_then(|v| v.to_str().ok()),
        Some(format!("pickup-order-{order_id}-dropoff").as_str())
    );
}

#[tokio::test]
async fn test_creating_the_same_commerce_order_twice_returns_one_order() {
    let h = Harness::start().await;
    h.install_shop().await;
    let body = serde_json::json!({
        "shop": locker_pickup_integration_tests::SHOP,
        "external_order_id": "1002"
    });

    let (first_status, first) = h.post("/orders", &body).await;
    let (second_status, second) = h.post("/orders", &body).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
}

// =============================================================================
// Provider failures
// =============================================================================

#[tokio::test]
async fn test_credential_failure_twice_leaves_order_untouched() {
    let h = Harness::start().await;
    h.install_shop().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "invalid_client",
            "error_description": "client authentication failed"
        })))
        .expect(2)
        .mount(&h.provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/deliveries"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&h.provider)
        .await;

    let order_id = h.create_order("1003").await;
    let before = h.order(order_id).await;

    for _ in 0..2 {
        let (status, body) = h
            .post(
                &format!("/orders/{order_id}/allocate"),
                &serde_json::json!({"location_id": LOCATION}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "provider_credentials");
    }

    let after = h.order(order_id).await;
    assert_eq!(after.status, PickupStatus::PendingDropoff);
    assert_eq!(after.dropoff_request_id, None);
    assert_eq!(after.allocation_attempts, 0);
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn test_outage_is_retried_then_pending_retry() {
    let h = Harness::start().await;
    h.install_shop().await;
    h.mount_token().await;
    Mock::given(method("POST"))
        .and(path("/v1/deliveries"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&h.provider)
        .await;

    let order_id = h.create_order("1004").await;
    let (status, body) = h
        .post(
            &format!("/orders/{order_id}/allocate"),
            &serde_json::json!({"location_id": LOCATION}),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "pending_retry");

    let (status, stuck) = h.get("/dashboard/stuck").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stuck[0]["id"], order_id.as_i64());
    assert_eq!(stuck[0]["allocation_attempts"], 3);
    assert_eq!(stuck[0]["status"], "pending_dropoff");

    // Provider recovers; the next attempt commits.
    h.provider.reset().await;
    h.mount_token().await;
    h.mount_delivery("dr-late", 1).await;
    let allocation = h.allocate(order_id).await;
    assert_eq!(allocation["created"], true);

    let (_, stuck) = h.get("/dashboard/stuck").await;
    assert_eq!(stuck, serde_json::json!([]));
}

#[tokio::test]
async fn test_no_free_compartment_is_not_retried() {
    let h = Harness::start().await;
    h.install_shop().await;
    h.mount_token().await;
    Mock::given(method("POST"))
        .and(path("/v1/deliveries"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(serde_json::json!({"error": "no_compartment"})),
        )
        .expect(1)
        .mount(&h.provider)
        .await;

    let order_id = h.create_order("1005").await;
    let (status, body) = h
        .post(
            &format!("/orders/{order_id}/allocate"),
            &serde_json::json!({"location_id": LOCATION}),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "no_capacity");
    assert_eq!(h.status(order_id).await, PickupStatus::PendingDropoff);
}

#[tokio::test]
async fn test_disabled_shop_cannot_allocate() {
    let h = Harness::start().await;
    let mut store = h.install_shop().await;
    let order_id = h.create_order("1006").await;
    store.disabled_at = Some(chrono::Utc::now());
    h.store.update_store(store).await;

    let (status, body) = h
        .post(
            &format!("/orders/{order_id}/allocate"),
            &serde_json::json!({"location_id": LOCATION}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "shop_disabled");
}
