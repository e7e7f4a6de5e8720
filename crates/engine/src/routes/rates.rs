//! Checkout carrier-service callback.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};

use crate::services::RateResponse;
use crate::state::AppState;

/// Header carrying the shop domain on carrier-service callbacks.
pub const SHOP_DOMAIN_HEADER: &str = "X-Shopify-Shop-Domain";

/// Create rate quote routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/carrier/rates", post(quote))
}

/// Always 200. An empty list means locker pickup is not offered.
async fn quote(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<RateResponse> {
    let shop = headers.get(SHOP_DOMAIN_HEADER).and_then(|v| v.to_str().ok());
    Json(state.rates().quote(shop, &body).await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    use super::*;
    use crate::db::MemoryStore;
    use crate::routes::{app, testing};

    const SHOP: &str = "acme.myshopify.com";

    fn request(shop: Option<&str>, country: &str) -> Request<Body> {
        let body = serde_json::json!({
            "rate": {
                "destination": {"country": country, "postal_code": "94103"},
                "items": [{"name": "Mug", "quantity": 1, "grams": 400, "price": 1800, "requires_shipping": true}],
                "currency": "USD"
            }
        });
        let mut builder = Request::builder()
            .method("POST")
            .uri("/carrier/rates")
            .header("content-type", "application/json");
        if let Some(shop) = shop {
            builder = builder.header(SHOP_DOMAIN_HEADER, shop);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    #[tokio::test]
    async fn test_quote_for_enabled_shop() {
        let store = Arc::new(MemoryStore::new());
        testing::reserved_order(&store, SHOP).await;
        let app = app(testing::state(&store, testing::config("http://provider.invalid/")));

        let (status, body) = testing::send(app, request(Some(SHOP), "US")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rates"][0]["service_code"], "LOCKER_PICKUP");
        assert_eq!(body["rates"][0]["total_price"], "0");
    }

    #[tokio::test]
    async fn test_declines_are_empty_200s() {
        let store = Arc::new(MemoryStore::new());
        testing::reserved_order(&store, SHOP).await;
        let app = app(testing::state(&store, testing::config("http://provider.invalid/")));

        for request in [request(Some(SHOP), "FR"), request(None, "US")] {
            let (status, body) = testing::send(app.clone(), request).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, serde_json::json!({"rates": []}));
        }
    }
}
