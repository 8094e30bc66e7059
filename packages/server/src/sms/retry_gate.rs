use chrono::{DateTime, Duration, Utc};
use common::{IdempotencyKey, ManualRetryConfig, RetryRejectionCode};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entity::{food_parcel, outgoing_sms};

use super::service::{DismissResult, InsertOutcome, NewMessage, SmsService};
use super::state::SmsState;
use super::SmsError;

/// A refused manual retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRejection {
    pub code: RetryRejectionCode,
    pub message: String,
    /// Seconds until the cooldown ends; only set for `COOLDOWN_ACTIVE`.
    pub retry_after_secs: Option<u64>,
}

impl RetryRejection {
    fn new(code: RetryRejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The original was dismissed and a queued copy inserted.
    Retried {
        original_id: Uuid,
        replacement_id: Uuid,
    },
    Rejected(RetryRejection),
}

/// Resend a failed message on an administrator's request.
///
/// Checks run in a fixed order and stop at the first failure. On success the
/// dismissal and the replacement insert commit together.
#[instrument(skip(db, config))]
pub async fn retry_message(
    db: &DatabaseConnection,
    config: &ManualRetryConfig,
    message_id: Uuid,
    admin_id: i32,
    now: DateTime<Utc>,
) -> Result<RetryOutcome, SmsError> {
    let txn = db.begin().await?;

    let outcome = retry_in_txn(&txn, config, message_id, admin_id, now).await?;

    match &outcome {
        RetryOutcome::Retried {
            original_id,
            replacement_id,
        } => {
            txn.commit().await?;
            info!(%original_id, %replacement_id, admin_id, "Failed message requeued by admin");
        }
        RetryOutcome::Rejected(rejection) => {
            txn.rollback().await?;
            info!(%message_id, code = %rejection.code, "Manual retry rejected");
        }
    }

    Ok(outcome)
}

async fn retry_in_txn<C: ConnectionTrait>(
    conn: &C,
    config: &ManualRetryConfig,
    message_id: Uuid,
    admin_id: i32,
    now: DateTime<Utc>,
) -> Result<RetryOutcome, SmsError> {
    use RetryRejectionCode::*;

    let store = SmsService::new(conn);
    let reject = |code, message: &str| Ok(RetryOutcome::Rejected(RetryRejection::new(code, message)));

    let Some(original) = store.get_by_id_for_update(message_id).await? else {
        return reject(NotFound, "Message not found");
    };

    let Some(parcel_id) = original.parcel_id else {
        return reject(InvalidAction, "Message is not tied to a parcel");
    };

    if !original.intent.is_manually_retryable() {
        return reject(InvalidAction, "Messages of this kind cannot be resent");
    }

    if !matches!(original.state(), Ok(SmsState::Failed { dismissed: false, .. })) {
        return reject(InvalidAction, "Only failed, undismissed messages can be resent");
    }

    let parcel = food_parcel::Entity::find_by_id(parcel_id).one(conn).await?;
    let Some(parcel) = parcel.filter(|p| p.deleted_at.is_none()) else {
        return reject(InvalidAction, "The parcel no longer exists");
    };

    if parcel.pickup_date_time_earliest - now < Duration::minutes(config.min_lead_minutes) {
        return reject(TooLate, "Pickup starts too soon to resend");
    }

    let cooldown = Duration::minutes(config.cooldown_minutes);
    let recent = outgoing_sms::Entity::find()
        .filter(outgoing_sms::Column::ParcelId.eq(parcel_id))
        .filter(outgoing_sms::Column::Id.ne(original.id))
        .filter(outgoing_sms::Column::CreatedAt.gt(now - cooldown))
        .order_by_desc(outgoing_sms::Column::CreatedAt)
        .one(conn)
        .await?;

    if let Some(recent) = recent {
        return Ok(RetryOutcome::Rejected(RetryRejection {
            code: CooldownActive,
            message: "A message for this parcel was sent moments ago".into(),
            retry_after_secs: Some(cooldown_remaining(recent.created_at, cooldown, now)),
        }));
    }

    if store.dismiss(original.id, Some(admin_id), now).await? != DismissResult::Dismissed {
        return reject(InvalidAction, "Message was modified concurrently");
    }

    let replacement_id = Uuid::now_v7();
    let replacement = NewMessage {
        household_id: original.household_id,
        parcel_id: Some(parcel_id),
        intent: original.intent,
        to_phone: original.to_phone.clone(),
        text: original.text.clone(),
        idempotency_key: IdempotencyKey::for_retry(&original.idempotency_key, replacement_id),
        parcel_pickup_at: original.parcel_pickup_at,
        parcel_location_id: original.parcel_location_id,
    };

    match store.enqueue_with_id(replacement_id, replacement, now).await? {
        InsertOutcome::Inserted(replacement_id) => Ok(RetryOutcome::Retried {
            original_id: original.id,
            replacement_id,
        }),
        InsertOutcome::AlreadyExists => Err(SmsError::CorruptState {
            id: original.id,
            reason: "retry key already taken",
        }),
    }
}

/// Whole seconds until `created_at + cooldown`, at least 1.
fn cooldown_remaining(created_at: DateTime<Utc>, cooldown: Duration, now: DateTime<Utc>) -> u64 {
    let remaining = (created_at + cooldown - now).num_milliseconds();
    let secs = (remaining + 999) / 1000;
    u64::try_from(secs).unwrap_or(0).max(1)
}
