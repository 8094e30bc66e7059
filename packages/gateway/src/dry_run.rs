use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::models::{Balance, SendReceipt, SmsGateway};

/// Accepts every message without contacting a provider.
///
/// Used when `gateway.enabled = false` so local environments exercise the
/// whole queue without spending credit.
#[derive(Debug, Clone)]
pub struct DryRunGateway {
    credits: i64,
}

impl DryRunGateway {
    pub fn with_credits(credits: i64) -> Self {
        Self { credits }
    }
}

impl Default for DryRunGateway {
    fn default() -> Self {
        Self::with_credits(1_000)
    }
}

#[async_trait]
impl SmsGateway for DryRunGateway {
    async fn send(&self, _to: &str, text: &str) -> Result<SendReceipt, GatewayError> {
        let provider_message_id = format!("dry-run-{}", Uuid::new_v4());
        info!(
            provider_message_id = %provider_message_id,
            length = text.chars().count(),
            "Dry-run SMS accepted"
        );
        Ok(SendReceipt {
            provider_message_id,
        })
    }

    async fn check_balance(&self) -> Result<Balance, GatewayError> {
        Ok(Balance {
            credits: self.credits,
        })
    }
}
