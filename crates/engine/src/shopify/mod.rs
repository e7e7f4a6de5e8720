//! Commerce platform write-back.
//!
//! After a reservation commits, the locker is recorded on the Shopify order as
//! a `Pickup locker` custom attribute through the Admin GraphQL API. Each
//! store authenticates with its own Admin API token.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use url::Url;

use crate::models::Store;

/// Custom attribute key written onto annotated orders.
pub const PICKUP_ATTRIBUTE: &str = "Pickup locker";

const ORDER_UPDATE_MUTATION: &str = r"mutation OrderUpdate($input: OrderInput!) {
  orderUpdate(input: $input) {
    order { id }
    userErrors { field message }
  }
}";

/// Errors that can occur when writing to the commerce platform.
#[derive(Debug, Error)]
pub enum CommerceError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GraphQL query returned errors.
    #[error("GraphQL errors: {0}")]
    GraphQL(String),

    /// Rate limited by Shopify.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Authentication/authorization failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// User error from mutation (e.g., invalid input).
    #[error("User error: {0}")]
    UserError(String),

    /// The store has no Admin API token.
    #[error("store has no commerce access token")]
    MissingToken,
}

/// Writes allocation details back onto commerce orders.
#[async_trait]
pub trait OrderAnnotator: Send + Sync {
    async fn annotate_order(
        &self,
        store: &Store,
        external_order_id: &str,
        description: &str,
    ) -> Result<(), CommerceError>;
}

/// Shopify Admin GraphQL implementation of [`OrderAnnotator`].
#[derive(Clone)]
pub struct ShopifyAnnotator {
    client: reqwest::Client,
    api_version: String,
    /// Replaces `https://{shop}/` as the API root.
    base_override: Option<Url>,
}

#[derive(Serialize)]
struct GraphQLRequest<'a> {
    query: &'static str,
    variables: OrderUpdateVariables<'a>,
}

#[derive(Serialize)]
struct OrderUpdateVariables<'a> {
    input: OrderInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderInput<'a> {
    id: String,
    custom_attributes: [Attribute<'a>; 1],
}

#[derive(Serialize)]
struct Attribute<'a> {
    key: &'static str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    data: Option<OrderUpdateData>,
    #[serde(default)]
    errors: Vec<GraphQLErrorResponse>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderUpdateData {
    order_update: Option<OrderUpdatePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderUpdatePayload {
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct UserError {
    field: Option<Vec<String>>,
    message: String,
}

/// Accepts numeric ids and full GIDs.
fn order_gid(external_order_id: &str) -> String {
    if external_order_id.starts_with("gid://") {
        external_order_id.to_string()
    } else {
        format!("gid://shopify/Order/{external_order_id}")
    }
}

impl ShopifyAnnotator {
    #[must_use]
    pub fn new(client: reqwest::Client, api_version: impl Into<String>) -> Self {
        Self {
            client,
            api_version: api_version.into(),
            base_override: None,
        }
    }

    /// Send every request to `base` instead of the shop's own domain.
    #[must_use]
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base_override = Some(base);
        self
    }

    fn endpoint(&self, shop: &str) -> Result<Url, CommerceError> {
        let path = format!("admin/api/{}/graphql.json", self.api_version);
        let joined = match &self.base_override {
            Some(base) => base.join(&path),
            None => Url::parse(&format!("https://{shop}/{path}")),
        };
        joined.map_err(|e| CommerceError::GraphQL(format!("invalid endpoint for {shop}: {e}")))
    }
}

#[async_trait]
impl OrderAnnotator for ShopifyAnnotator {
    #[instrument(skip(self, store, description), fields(shop = %store.shop))]
    async fn annotate_order(
        &self,
        store: &Store,
        external_order_id: &str,
        description: &str,
    ) -> Result<(), CommerceError> {
        let token = store
            .commerce_access_token
            .as_ref()
            .ok_or(CommerceError::MissingToken)?;

        let body = GraphQLRequest {
            query: ORDER_UPDATE_MUTATION,
            variables: OrderUpdateVariables {
                input: OrderInput {
                    id: order_gid(external_order_id),
                    custom_attributes: [Attribute {
                        key: PICKUP_ATTRIBUTE,
                        value: description,
                    }],
                },
            },
        };

        let response = self
            .client
            .post(self.endpoint(&store.shop)?)
            .header("X-Shopify-Access-Token", token.expose_secret())
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(CommerceError::RateLimited(retry_after));
        }

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CommerceError::Unauthorized(
                "Invalid or expired access token".to_string(),
            ));
        }

        let graphql: GraphQLResponse = response.json().await?;

        if !graphql.errors.is_empty() {
            let messages: Vec<String> = graphql.errors.into_iter().map(|e| e.message).collect();
            return Err(CommerceError::GraphQL(messages.join("; ")));
        }

        if let Some(payload) = graphql.data.and_then(|d| d.order_update)
            && !payload.user_errors.is_empty()
        {
            let error_messages: Vec<String> = payload
                .user_errors
                .iter()
                .map(|e| {
                    let field = e.field.as_ref().map_or_else(String::new, |f| f.join("."));
                    format!("{}: {}", field, e.message)
                })
                .collect();
            return Err(CommerceError::UserError(error_messages.join("; ")));
        }

        tracing::info!(order = %external_order_id, "Commerce order annotated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use locker_pickup_core::StoreId;
    use secrecy::SecretString;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn store(token: Option<&str>) -> Store {
        Store {
            id: StoreId::new(1),
            shop: "acme.myshopify.com".to_string(),
            provider_client_id: "cid".to_string(),
            provider_client_secret: SecretString::from("secret"),
            commerce_access_token: token.map(|t| SecretString::from(t.to_string())),
            installed_at: Utc::now(),
            disabled_at: None,
        }
    }

    fn annotator(server: &MockServer) -> ShopifyAnnotator {
        ShopifyAnnotator::new(reqwest::Client::new(), "2026-07")
            .with_base_url(Url::parse(&format!("{}/", server.uri())).expect("url"))
    }

    #[test]
    fn test_order_gid() {
        assert_eq!(order_gid("5001"), "gid://shopify/Order/5001");
        assert_eq!(order_gid("gid://shopify/Order/5001"), "gid://shopify/Order/5001");
    }

    #[tokio::test]
    async fn test_writes_custom_attribute() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/api/2026-07/graphql.json"))
            .and(header("X-Shopify-Access-Token", "shpat_1"))
            .and(body_partial_json(serde_json::json!({
                "variables": {"input": {
                    "id": "gid://shopify/Order/5001",
                    "customAttributes": [{"key": "Pickup locker", "value": "Main St (locker B4, location loc-1)"}]
                }}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"orderUpdate": {"order": {"id": "gid://shopify/Order/5001"}, "userErrors": []}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        annotator(&server)
            .annotate_order(&store(Some("shpat_1")), "5001", "Main St (locker B4, location loc-1)")
            .await
            .expect("annotate");
    }

    #[tokio::test]
    async fn test_user_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"orderUpdate": {"order": null, "userErrors": [
                    {"field": ["id"], "message": "Order does not exist"}
                ]}}
            })))
            .mount(&server)
            .await;

        let err = annotator(&server)
            .annotate_order(&store(Some("shpat_1")), "9", "x")
            .await
            .expect_err("user error");
        assert_eq!(err.to_string(), "User error: id: Order does not exist");
    }

    #[tokio::test]
    async fn test_missing_token_skips_request() {
        let server = MockServer::start().await;
        let err = annotator(&server)
            .annotate_order(&store(None), "9", "x")
            .await
            .expect_err("no token");
        assert!(matches!(err, CommerceError::MissingToken));
        assert!(server.received_requests().await.expect("recorded").is_empty());
    }
}
