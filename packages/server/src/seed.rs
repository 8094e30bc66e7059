use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, DbErr};
use tracing::{info, warn};

use crate::entity::outgoing_sms;

/// Create the composite indexes the queue relies on.
///
/// Failures are logged and skipped; a missing index only costs performance.
pub async fn ensure_indexes<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    // Due-message selection:
    // WHERE status IN ('queued','retrying') AND next_attempt_at <= ?
    let due = Index::create()
        .if_not_exists()
        .name("idx_outgoing_sms_status_next_attempt")
        .table(outgoing_sms::Entity)
        .col(outgoing_sms::Column::Status)
        .col(outgoing_sms::Column::NextAttemptAt)
        .to_owned();
    create_index(db, "idx_outgoing_sms_status_next_attempt", &due).await;

    // Manual retry cooldown:
    // WHERE parcel_id = ? AND created_at > ?
    let cooldown = Index::create()
        .if_not_exists()
        .name("idx_outgoing_sms_parcel_created")
        .table(outgoing_sms::Entity)
        .col(outgoing_sms::Column::ParcelId)
        .col(outgoing_sms::Column::CreatedAt)
        .to_owned();
    create_index(db, "idx_outgoing_sms_parcel_created", &cooldown).await;

    // Balance alert and requeue:
    // WHERE balance_failure = true AND dismissed_at IS NULL
    let balance = Index::create()
        .if_not_exists()
        .name("idx_outgoing_sms_balance_dismissed")
        .table(outgoing_sms::Entity)
        .col(outgoing_sms::Column::BalanceFailure)
        .col(outgoing_sms::Column::DismissedAt)
        .to_owned();
    create_index(db, "idx_outgoing_sms_balance_dismissed", &balance).await;

    Ok(())
}

async fn create_index<C: ConnectionTrait>(db: &C, name: &str, stmt: &IndexCreateStatement) {
    let backend = db.get_database_backend();
    match db.execute_raw(backend.build(stmt)).await {
        Ok(_) => info!("Ensured index {} exists", name),
        Err(e) => warn!("Failed to create index {}: {}", name, e),
    }
}
