use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::redact::redact_phone_numbers;
use gateway::SmsGateway;
use sea_orm::ConnectionTrait;
use tracing::{info, instrument, warn};

use super::service::SmsService;
use super::SmsError;

/// Admin-facing view of the provider account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceStatus {
    /// Credits are zero or undismissed balance failures exist.
    pub has_insufficient_balance: bool,
    /// `None` when the balance check failed.
    pub credits: Option<i64>,
    pub balance_check_error: Option<String>,
    /// Undismissed messages that failed for lack of credit.
    pub failed_count: u64,
}

/// Reports and recovers from insufficient-credit conditions.
#[derive(Clone)]
pub struct BalanceMonitor {
    gateway: Arc<dyn SmsGateway>,
}

impl BalanceMonitor {
    pub fn new(gateway: Arc<dyn SmsGateway>) -> Self {
        Self { gateway }
    }

    /// Live credit and stored balance failures, computed independently.
    #[instrument(skip(self, conn))]
    pub async fn get_balance_status<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<BalanceStatus, SmsError> {
        let (credits, balance_check_error) = match self.gateway.check_balance().await {
            Ok(balance) => (Some(balance.credits), None),
            Err(e) => {
                let message = redact_phone_numbers(&e.to_string());
                warn!(error = %message, "Balance check failed");
                (None, Some(message))
            }
        };

        let failed_count = SmsService::new(conn).count_balance_failures().await?;

        Ok(BalanceStatus {
            has_insufficient_balance: credits.is_some_and(|c| c <= 0) || failed_count > 0,
            credits,
            balance_check_error,
            failed_count,
        })
    }

    /// Requeue every undismissed balance failure once credit is restored.
    #[instrument(skip(self, conn))]
    pub async fn requeue_balance_failures<C: ConnectionTrait>(
        &self,
        conn: &C,
        now: DateTime<Utc>,
    ) -> Result<u64, SmsError> {
        let count = SmsService::new(conn).requeue_balance_failures(now).await?;
        info!(count, "Requeued balance failures");
        Ok(count)
    }
}
