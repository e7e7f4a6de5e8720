//! Operator views: stuck allocations and orders by status.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;

use locker_pickup_core::PickupStatus;

use crate::error::AppError;
use crate::models::PickupOrder;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

/// Create dashboard routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard/stuck", get(stuck))
        .route("/dashboard/orders", get(orders))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OrdersParams {
    shop: String,
    status: PickupStatus,
    limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Orders still waiting for a committed allocation, with their last error.
async fn stuck(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<PickupOrder>>, AppError> {
    let orders = state.store().stuck_orders(clamp_limit(params.limit)).await?;
    Ok(Json(orders))
}

async fn orders(
    State(state): State<AppState>,
    Query(params): Query<OrdersParams>,
) -> Result<Json<Vec<PickupOrder>>, AppError> {
    let store = state
        .store()
        .store_by_shop(&params.shop)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("shop {}", params.shop)))?;

    let orders = state
        .store()
        .orders_by_status(store.id, params.status, clamp_limit(params.limit))
        .await?;
    Ok(Json(orders))
}
