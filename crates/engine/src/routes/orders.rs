//! Pickup order endpoints used by the merchant's order flow.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use locker_pickup_core::{CustomerContact, OrderId, SizeClass};

use crate::error::AppError;
use crate::models::{LockerEvent, PickupOrder};
use crate::state::AppState;

/// Create order routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create))
        .route("/orders/{id}", get(show))
        .route("/orders/{id}/allocate", post(allocate))
        .route("/orders/{id}/cancel", post(cancel))
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    shop: String,
    external_order_id: String,
    #[serde(default)]
    customer: CustomerContact,
    /// Size class of each line item; the order needs the largest.
    #[serde(default)]
    item_sizes: Vec<SizeClass>,
}

#[derive(Debug, Deserialize)]
struct AllocateRequest {
    location_id: String,
}

#[derive(Debug, Serialize)]
struct OrderDetail {
    order: PickupOrder,
    events: Vec<LockerEvent>,
}

/// 201 for a new order, 200 when the commerce order already had one.
#[instrument(skip(state, request), fields(shop = %request.shop))]
async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .allocation()
        .create_order(
            &request.shop,
            &request.external_order_id,
            request.customer,
            &request.item_sizes,
        )
        .await?;

    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(created.order)))
}

async fn show(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderDetail>, AppError> {
    let order = state
        .store()
        .order(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;
    let events = state.store().order_events(id).await?;
    Ok(Json(OrderDetail { order, events }))
}

/// 201 when this call reserved the compartment, 200 when the order already
/// had one.
#[instrument(skip(state, request), fields(location_id = %request.location_id))]
async fn allocate(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(request): Json<AllocateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let allocation = state.allocation().allocate(id, &request.location_id).await?;
    let status = if allocation.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(allocation)))
}

#[instrument(skip(state))]
async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.lifecycle().cancel(id).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use locker_pickup_core::PickupStatus;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::db::{MemoryStore, PickupStore};
    use crate::routes::{app, testing};

    const SHOP: &str = "acme.myshopify.com";

    #[tokio::test]
    async fn test_create_is_idempotent_per_commerce_order() {
        let store = Arc::new(MemoryStore::new());
        store.insert_store(SHOP, "cid", "secret").await;
        let app = app(testing::state(&store, testing::config("http://provider.invalid/")));
        let body = serde_json::json!({
            "shop": SHOP,
            "external_order_id": "1001",
            "customer": {"name": "Ada", "email": "ada@example.com", "phone": null},
            "item_sizes": ["small", "large", "medium"]
        });

        let (status, first) = testing::send(app.clone(), testing::post_json("/orders", &body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["status"], "pending_dropoff");
        assert_eq!(first["required_size"], "large");

        let (status, second) = testing::send(app, testing::post_json("/orders", &body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["id"], first["id"]);
    }

    #[tokio::test]
    async fn test_create_for_unknown_shop_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let app = app(testing::state(&store, testing::config("http://provider.invalid/")));
        let body = serde_json::json!({"shop": SHOP, "external_order_id": "1001"});

        let (status, body) = testing::send(app, testing::post_json("/orders", &body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_shop");
    }

    #[tokio::test]
    async fn test_allocate_then_allocate_again() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/deliveries"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "dr-77",
                "access_link": "https://l.test/dr-77",
                "compartment_id": "C2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        store.insert_store(SHOP, "cid", "secret").await;
        let install = store.store_by_shop(SHOP).await.expect("load").expect("store");
        store.insert_preference(install.id, "loc-1", "Main St", true).await;
        let app = app(testing::state(&store, testing::config(&format!("{}/", server.uri()))));

        let (_, order) = testing::send(
            app.clone(),
            testing::post_json("/orders", &serde_json::json!({"shop": SHOP, "external_order_id": "1002"})),
        )
        .await;
        let uri = format!("/orders/{}/allocate", order["id"]);
        let request = serde_json::json!({"location_id": "loc-1"});

        let (status, first) = testing::send(app.clone(), testing::post_json(&uri, &request)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["reservation"]["dropoff_link"], "https://l.test/dr-77");

        let (status, second) = testing::send(app, testing::post_json(&uri, &request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["reservation"], first["reservation"]);
        assert_eq!(second["created"], false);
    }

    #[tokio::test]
    async fn test_allocate_at_unapproved_location_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let order_id = {
            let install = store.insert_store(SHOP, "cid", "secret").await;
            store
                .create_order(crate::models::NewOrder {
                    store_id: install.id,
                    external_order_id: "1003".to_string(),
                    customer: CustomerContact::default(),
                    required_size: SizeClass::Small,
                })
                .await
                .expect("order")
                .order
                .id
        };
        let app = app(testing::state(&store, testing::config("http://provider.invalid/")));

        let (status, body) = testing::send(
            app,
            testing::post_json(
                &format!("/orders/{order_id}/allocate"),
                &serde_json::json!({"location_id": "loc-elsewhere"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "location_not_enabled");
    }

    #[tokio::test]
    async fn test_show_and_cancel() {
        let store = Arc::new(MemoryStore::new());
        let order_id = testing::reserved_order(&store, SHOP).await;
        let app = app(testing::state(&store, testing::config("http://provider.invalid/")));

        let (status, body) = testing::send(
            app.clone(),
            testing::post_json(&format!("/orders/{order_id}/cancel"), &serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "applied");
        assert_eq!(body["to"], "cancelled");

        let (status, body) =
            testing::send(app.clone(), testing::get(&format!("/orders/{order_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order"]["status"], "cancelled");
        assert_eq!(body["events"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["events"][0]["source"], "merchant");

        let (status, _) = testing::send(app, testing::get("/orders/999999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let order = store.order(order_id).await.expect("load").expect("order");
        assert_eq!(order.status, PickupStatus::Cancelled);
    }
}
