//! Provider webhook endpoint.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;
use secrecy::SecretString;
use tracing::instrument;

use crate::error::AppError;
use crate::provider::webhook::{SIGNATURE_HEADER, SignatureError, TIMESTAMP_HEADER, verify_signature};
use crate::services::EventOutcome;
use crate::state::AppState;

/// Create provider webhook routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/provider", post(provider_event))
}

/// Ingest one locker event.
///
/// Answers 200 for matched events (applied or not), 202 for events no order
/// claimed, 400 for malformed bodies and 401 for bad signatures.
#[instrument(skip(state, headers, body))]
async fn provider_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if let Some(secret) = &state.config().provider.webhook_secret {
        check_signature(secret, &headers, &body).map_err(|e| {
            tracing::warn!(error = %e, "Rejected provider webhook");
            AppError::Unauthorized(e.to_string())
        })?;
    }

    let ingested = state.ingestion().ingest(&body).await?;
    let status = if ingested.outcome == EventOutcome::Unmatched {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ingested)))
}

fn check_signature(
    secret: &SecretString,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), SignatureError> {
    let header = |name: &'static str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .ok_or(SignatureError::MissingHeader(name))
    };
    verify_signature(
        secret,
        header(TIMESTAMP_HEADER)?,
        body,
        header(SIGNATURE_HEADER)?,
        Utc::now(),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use locker_pickup_core::PickupStatus;

    use super::*;
    use crate::db::{MemoryStore, PickupStore};
    use crate::provider::webhook::sign;
    use crate::routes::{app, testing};

    const SHOP: &str = "acme.myshopify.com";

    fn event(delivery_id: &str, event_type: &str) -> String {
        serde_json::json!({
            "delivery_id": delivery_id,
            "event_type": event_type,
            "occurred_at": "2026-10-19T10:00:00Z"
        })
        .to_string()
    }

    fn request(body: String, signature: Option<(&str, String)>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/provider")
            .header("content-type", "application/json");
        if let Some((timestamp, signature)) = signature {
            builder = builder
                .header(TIMESTAMP_HEADER, timestamp)
                .header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body)).expect("request")
    }

    #[tokio::test]
    async fn test_matched_event_applies() {
        let store = Arc::new(MemoryStore::new());
        let order_id = testing::reserved_order(&store, SHOP).await;
        let app = app(testing::state(&store, testing::config("http://provider.invalid/")));

        let (status, body) =
            testing::send(app, request(event("dr-1", "dropoff.completed"), None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "applied");
        assert_eq!(body["to"], "dropped_off");
        let order = store.order(order_id).await.expect("load").expect("order");
        assert_eq!(order.status, PickupStatus::DroppedOff);
    }

    #[tokio::test]
    async fn test_unmatched_event_is_accepted() {
        let store = Arc::new(MemoryStore::new());
        let app = app(testing::state(&store, testing::config("http://provider.invalid/")));

        let (status, body) =
            testing::send(app, request(event("dr-404", "pickup.ready"), None)).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["outcome"], "unmatched");
        assert_eq!(store.unmatched_events(10).await.expect("events").len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let store = Arc::new(MemoryStore::new());
        let app = app(testing::state(&store, testing::config("http://provider.invalid/")));

        let (status, body) = testing::send(app, request("{\"oops\":".to_string(), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_signature_checked_when_secret_configured() {
        let store = Arc::new(MemoryStore::new());
        let order_id = testing::reserved_order(&store, SHOP).await;
        let secret = SecretString::from("whsec");
        let mut config = testing::config("http://provider.invalid/");
        config.provider.webhook_secret = Some(secret.clone());
        let app = app(testing::state(&store, config));

        let body = event("dr-1", "dropoff.completed");
        let (status, _) = testing::send(app.clone(), request(body.clone(), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let timestamp = Utc::now().timestamp().to_string();
        let forged = sign(&SecretString::from("other"), &timestamp, body.as_bytes());
        let (status, _) = testing::send(
            app.clone(),
            request(body.clone(), Some((&timestamp, forged))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let order = store.order(order_id).await.expect("load").expect("order");
        assert_eq!(order.status, PickupStatus::PendingDropoff);

        let signature = sign(&secret, &timestamp, body.as_bytes());
        let (status, _) =
            testing::send(app, request(body, Some((&timestamp, signature)))).await;
        assert_eq!(status, StatusCode::OK);
    }
}
