use std::sync::Arc;

use gateway::{FailureClassifier, SmsGateway};
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::sms::{BalanceMonitor, QueueProcessor};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub gateway: Arc<dyn SmsGateway>,
    pub classifier: FailureClassifier,
}

impl AppState {
    pub fn processor(&self) -> QueueProcessor {
        QueueProcessor::new(
            self.gateway.clone(),
            self.classifier.clone(),
            &self.config.sms,
        )
    }

    pub fn balance_monitor(&self) -> BalanceMonitor {
        BalanceMonitor::new(self.gateway.clone())
    }
}
