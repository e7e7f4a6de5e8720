//! Locker search for checkout and merchant tooling.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use locker_pickup_core::{Coordinates, SizeClass};

use crate::error::AppError;
use crate::services::{AllocationError, LockerCandidate};
use crate::state::AppState;

/// Create locker search routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/lockers/search", get(search))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    shop: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    size: SizeClass,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    candidates: Vec<LockerCandidate>,
    /// Why the list is empty, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

/// Ranked candidates near a point.
///
/// "Nothing nearby" and "nothing free" are answers, not errors: both return
/// 200 with an empty list and a reason.
#[instrument(skip(state, params), fields(shop = %params.shop, size = %params.size))]
async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let near = Coordinates::new(params.lat, params.lon)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let result = state
        .allocation()
        .find_candidates(&params.shop, near, params.size, params.limit)
        .await;

    let response = match result {
        Ok(candidates) => SearchResponse {
            candidates,
            reason: None,
        },
        Err(AllocationError::NoLocationsNearby) => SearchResponse {
            candidates: Vec::new(),
            reason: Some("no_locations_nearby"),
        },
        Err(AllocationError::NoCapacity) => SearchResponse {
            candidates: Vec::new(),
            reason: Some("no_capacity"),
        },
        Err(e) => return Err(e.into()),
    };
    Ok(Json(response))
}
