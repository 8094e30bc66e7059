use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::GatewayConfig;
use crate::dry_run::DryRunGateway;
use crate::error::GatewayError;
use crate::http::HttpSmsGateway;

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub provider_message_id: String,
}

/// Remaining account credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub credits: i64,
}

/// Outbound SMS provider.
///
/// Implementations must not retry internally; the queue owns retry policy.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Submit one message for delivery.
    async fn send(&self, to: &str, text: &str) -> Result<SendReceipt, GatewayError>;

    /// Query the remaining credit on the provider account.
    async fn check_balance(&self) -> Result<Balance, GatewayError>;
}

/// Build the gateway selected by configuration.
pub fn init_gateway(config: &GatewayConfig) -> Result<Arc<dyn SmsGateway>, GatewayError> {
    if !config.enabled {
        info!("SMS gateway disabled, using dry-run gateway");
        return Ok(Arc::new(DryRunGateway::default()));
    }

    let gateway = HttpSmsGateway::new(config.clone())?;
    info!(base_url = %config.base_url, test_mode = config.test_mode, "SMS gateway initialized");
    Ok(Arc::new(gateway))
}
