use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::SmsConfig;
use gateway::{FailureClassifier, SmsGateway};
use sea_orm::DatabaseConnection;
use tracing::{error, info};

use super::enqueue::enqueue_eligible_notifications;
use super::processor::QueueProcessor;

/// Run enqueue + send on a fixed interval as a background task.
///
/// Used when no external cron drives the job endpoints.
pub async fn run_scheduler(
    db: DatabaseConnection,
    gateway: Arc<dyn SmsGateway>,
    classifier: FailureClassifier,
    config: SmsConfig,
) {
    let tick = Duration::from_secs(config.scheduler.interval_secs.max(1));
    let processor = QueueProcessor::new(gateway, classifier, &config);

    info!(
        interval_secs = tick.as_secs(),
        batch_size = config.batch_size,
        "Starting SMS scheduler"
    );

    let mut interval = tokio::time::interval(tick);

    loop {
        interval.tick().await;

        if let Err(e) = enqueue_eligible_notifications(&db, &config, Utc::now()).await {
            error!(error = %e, "Scheduled enqueue failed");
        }

        if let Err(e) = processor.process_due_queue(&db, Utc::now()).await {
            error!(error = %e, "Scheduled queue processing failed");
        }
    }
}
