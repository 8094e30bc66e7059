use async_trait::async_trait;
use common::redact::redact_phone_numbers;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::models::{Balance, SendReceipt, SmsGateway};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    to: [&'a str; 1],
    from: &'a str,
    message: &'a str,
    test_mode: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    #[serde(default)]
    message_ids: Vec<SentMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentMessage {
    api_message_id: String,
}

#[derive(Deserialize)]
struct BalanceResponse {
    credits: i64,
}

/// JSON-over-HTTPS provider client with basic auth.
pub struct HttpSmsGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpSmsGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        if config.username.is_empty() || config.password.is_empty() {
            return Err(GatewayError::Config(
                "gateway.username and gateway.password must be set when the gateway is enabled"
                    .into(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> GatewayError {
        match GatewayError::from(e) {
            GatewayError::Timeout(_) => GatewayError::Timeout(self.config.timeout()),
            other => other,
        }
    }

    /// Turn a non-2xx response into [`GatewayError::Rejected`].
    async fn ensure_success(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            body
        };
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, to: &str, text: &str) -> Result<SendReceipt, GatewayError> {
        let request = SendRequest {
            to: [to],
            from: &self.config.sender,
            message: text,
            test_mode: self.config.test_mode,
        };

        let response = self
            .client
            .post(self.url("send"))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let response = Self::ensure_success(response).await.inspect_err(|e| {
            warn!(error = %redact_phone_numbers(&e.to_string()), "SMS provider rejected message");
        })?;

        let body: SendResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let provider_message_id = body
            .message_ids
            .into_iter()
            .next()
            .map(|m| m.api_message_id)
            .ok_or_else(|| GatewayError::InvalidResponse("response contained no message id".into()))?;

        debug!(provider_message_id = %provider_message_id, "SMS accepted by provider");

        Ok(SendReceipt {
            provider_message_id,
        })
    }

    async fn check_balance(&self) -> Result<Balance, GatewayError> {
        let response = self
            .client
            .get(self.url("account/balance"))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let body: BalanceResponse = Self::ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(Balance {
            credits: body.credits,
        })
    }
}
