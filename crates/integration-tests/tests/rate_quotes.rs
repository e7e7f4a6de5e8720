//! Checkout rate quote scenarios.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use locker_pickup_integration_tests::{Harness, SHOP};

fn quote_request(country: &str) -> Request<Body> {
    let body = serde_json::json!({
        "rate": {
            "destination": {"country": country, "postal_code": "10001", "city": "New York"},
            "items": [{"name": "Tee", "quantity": 2, "grams": 300, "price": 2500, "requires_shipping": true}],
            "currency": "USD"
        }
    });
    Request::builder()
        .method("POST")
        .uri("/carrier/rates")
        .header("content-type", "application/json")
        .header("X-Shopify-Shop-Domain", SHOP)
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn test_outside_service_country_is_empty_within_budget() {
    let h = Harness::start().await;
    h.install_shop().await;
    let budget = h.state.config().pickup.rates.budget;

    let started = Instant::now();
    let (status, body) = h.send(quote_request("DE")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"rates": []}));
    assert!(started.elapsed() < budget);

    // The provider is never asked during checkout.
    assert!(
        h.provider
            .received_requests()
            .await
            .is_none_or(|requests| requests.is_empty())
    );
}

#[tokio::test]
async fn test_in_country_offers_configured_rate() {
    let h = Harness::start_with(|config| {
        config.pickup.rates.service_name = "Pick up at a locker".to_string();
        config.pickup.rates.budget = Duration::from_millis(500);
    })
    .await;
    h.install_shop().await;

    let (status, body) = h.send(quote_request("US")).await;

    assert_eq!(status, StatusCode::OK);
    let rates = body["rates"].as_array().expect("rates");
    assert_eq!(rates.len(), 1);
    assert_eq!(rates[0]["service_name"], "Pick up at a locker");
    assert_eq!(rates[0]["currency"], "USD");
}

#[tokio::test]
async fn test_uninstalled_shop_gets_no_rate() {
    let h = Harness::start().await;

    let (status, body) = h.send(quote_request("US")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"rates": []}));
}
