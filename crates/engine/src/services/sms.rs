//! SMS channel over a Twilio-compatible REST gateway.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use locker_pickup_core::PhoneNumber;

use super::notifications::{NotificationError, SmsSender};
use crate::config::SmsConfig;

/// SMS gateway client.
#[derive(Clone)]
pub struct SmsService {
    inner: Arc<SmsServiceInner>,
}

struct SmsServiceInner {
    http: reqwest::Client,
    messages_url: Url,
    account_sid: String,
    auth_token: SecretString,
    from_number: String,
}

#[derive(Deserialize, Default)]
struct GatewayError {
    #[serde(default)]
    message: Option<String>,
}

impl SmsService {
    /// Create a client for the gateway in `config`.
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if the messages endpoint cannot be derived.
    pub fn new(http: reqwest::Client, config: &SmsConfig) -> Result<Self, url::ParseError> {
        let messages_url = config
            .api_url
            .join(&format!("Accounts/{}/Messages.json", config.account_sid))?;

        Ok(Self {
            inner: Arc::new(SmsServiceInner {
                http,
                messages_url,
                account_sid: config.account_sid.clone(),
                auth_token: config.auth_token.clone(),
                from_number: config.from_number.clone(),
            }),
        })
    }
}

#[async_trait]
impl SmsSender for SmsService {
    async fn send_sms(&self, to: &PhoneNumber, body: &str) -> Result<(), NotificationError> {
        let inner = &self.inner;
        let response = inner
            .http
            .post(inner.messages_url.clone())
            .basic_auth(&inner.account_sid, Some(inner.auth_token.expose_secret()))
            .form(&[
                ("To", to.as_str()),
                ("From", inner.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| NotificationError::Sms(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error: GatewayError = response.json().await.unwrap_or_default();
            return Err(NotificationError::Sms(
                error.message.unwrap_or_else(|| status.to_string()),
            ));
        }

        tracing::info!("SMS sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(server: &MockServer) -> SmsConfig {
        SmsConfig {
            api_url: Url::parse(&format!("{}/2010-04-01/", server.uri())).expect("url"),
            account_sid: "AC123".to_string(),
            auth_token: SecretString::from("token"),
            from_number: "+15550000000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_posts_form_to_account_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("To=%2B15551234567"))
            .and(body_string_contains("Body=Ready"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "SM1"})))
            .expect(1)
            .mount(&server)
            .await;

        let sms = SmsService::new(reqwest::Client::new(), &config(&server)).expect("service");
        let to = PhoneNumber::parse("+15551234567").expect("phone");
        sms.send_sms(&to, "Ready").await.expect("send");
    }

    #[tokio::test]
    async fn test_gateway_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"message": "The 'To' number is not valid."})),
            )
            .mount(&server)
            .await;

        let sms = SmsService::new(reqwest::Client::new(), &config(&server)).expect("service");
        let to = PhoneNumber::parse("+15551234567").expect("phone");
        let err = sms.send_sms(&to, "Ready").await.expect_err("400");
        assert!(err.to_string().contains("not valid"), "{err}");
    }
}
