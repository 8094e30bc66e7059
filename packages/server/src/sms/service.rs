use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{IdempotencyKey, SmsIntent, SmsStatus};
use sea_orm::sea_query::{Expr, LockType, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::entity::outgoing_sms;

/// A message ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub household_id: Uuid,
    pub parcel_id: Option<Uuid>,
    pub intent: SmsIntent,
    pub to_phone: String,
    pub text: String,
    pub idempotency_key: IdempotencyKey,
    pub parcel_pickup_at: Option<DateTime<Utc>>,
    pub parcel_location_id: Option<Uuid>,
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new queued message was stored.
    Inserted(Uuid),
    /// A message with the same idempotency key already exists.
    AlreadyExists,
}

/// Result of dismissing a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissResult {
    Dismissed,
    NotFound,
    AlreadyDismissed,
    /// Only failed messages can be dismissed.
    NotFailed,
}

/// Counts shown on the admin failure dashboard.
#[derive(Debug, Clone)]
pub struct FailureStats {
    /// Undismissed failed messages.
    pub total_failed: u64,
    /// Undismissed failed messages flagged as balance failures.
    pub balance_failures: u64,
    /// Undismissed failed messages by intent.
    pub by_intent: HashMap<String, u64>,
}

pub struct SmsService<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> SmsService<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Queue a message unless its idempotency key is already taken.
    ///
    /// A key conflict is not an error: the notification was already handled.
    pub async fn enqueue(
        &self,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, DbErr> {
        self.enqueue_with_id(Uuid::now_v7(), message, now).await
    }

    /// [`Self::enqueue`] with a caller-chosen id, for keys that embed it.
    pub async fn enqueue_with_id(
        &self,
        id: Uuid,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, DbErr> {
        let model = outgoing_sms::ActiveModel {
            id: Set(id),
            household_id: Set(message.household_id),
            parcel_id: Set(message.parcel_id),
            intent: Set(message.intent),
            status: Set(SmsStatus::Queued),
            to_phone: Set(message.to_phone),
            text: Set(message.text),
            idempotency_key: Set(message.idempotency_key.into_string()),
            attempt_count: Set(0),
            next_attempt_at: Set(Some(now)),
            last_attempt_at: Set(None),
            last_error_message: Set(None),
            balance_failure: Set(false),
            provider_message_id: Set(None),
            provider_status: Set(None),
            provider_status_updated_at: Set(None),
            sent_at: Set(None),
            dismissed_at: Set(None),
            dismissed_by_user_id: Set(None),
            parcel_pickup_at: Set(message.parcel_pickup_at),
            parcel_location_id: Set(message.parcel_location_id),
            created_at: Set(now),
        };

        let result = outgoing_sms::Entity::insert(model)
            .on_conflict(
                OnConflict::column(outgoing_sms::Column::IdempotencyKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.conn)
            .await;

        match result {
            Ok(0) => Ok(InsertOutcome::AlreadyExists),
            Ok(_) => Ok(InsertOutcome::Inserted(id)),
            Err(DbErr::RecordNotInserted) => Ok(InsertOutcome::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<outgoing_sms::Model>, DbErr> {
        outgoing_sms::Entity::find_by_id(id).one(self.conn).await
    }

    /// Get a message with a FOR UPDATE lock (no-op on SQLite).
    pub async fn get_by_id_for_update(
        &self,
        id: Uuid,
    ) -> Result<Option<outgoing_sms::Model>, DbErr> {
        outgoing_sms::Entity::find_by_id(id)
            .lock(LockType::Update)
            .one(self.conn)
            .await
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Option<outgoing_sms::Model>, DbErr> {
        outgoing_sms::Entity::find()
            .filter(outgoing_sms::Column::IdempotencyKey.eq(key))
            .one(self.conn)
            .await
    }

    /// Due messages as `(id, attempt_count)`, oldest schedule first.
    pub async fn due_messages(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<(Uuid, i32)>, DbErr> {
        outgoing_sms::Entity::find()
            .select_only()
            .column(outgoing_sms::Column::Id)
            .column(outgoing_sms::Column::AttemptCount)
            .filter(outgoing_sms::Column::Status.is_in(SmsStatus::SENDABLE.iter().copied()))
            .filter(outgoing_sms::Column::NextAttemptAt.lte(now))
            .order_by_asc(outgoing_sms::Column::NextAttemptAt)
            .order_by_asc(outgoing_sms::Column::CreatedAt)
            .limit(limit)
            .into_tuple()
            .all(self.conn)
            .await
    }

    /// Atomically move a due message to `sending` and count the attempt.
    ///
    /// Returns `false` when another processor got there first.
    pub async fn claim(
        &self,
        id: Uuid,
        expected_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(outgoing_sms::Column::Status, Expr::value(SmsStatus::Sending))
            .col_expr(
                outgoing_sms::Column::AttemptCount,
                Expr::value(expected_attempts + 1),
            )
            .col_expr(outgoing_sms::Column::LastAttemptAt, Expr::value(Some(now)))
            .col_expr(
                outgoing_sms::Column::NextAttemptAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .filter(outgoing_sms::Column::Id.eq(id))
            .filter(outgoing_sms::Column::Status.is_in(SmsStatus::SENDABLE.iter().copied()))
            .filter(outgoing_sms::Column::NextAttemptAt.lte(now))
            .filter(outgoing_sms::Column::AttemptCount.eq(expected_attempts))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Record a successful send for the attempt that claimed the message.
    pub async fn mark_sent(
        &self,
        id: Uuid,
        attempt: i32,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(outgoing_sms::Column::Status, Expr::value(SmsStatus::Sent))
            .col_expr(outgoing_sms::Column::SentAt, Expr::value(Some(now)))
            .col_expr(
                outgoing_sms::Column::ProviderMessageId,
                Expr::value(Some(provider_message_id.to_string())),
            )
            .col_expr(
                outgoing_sms::Column::LastErrorMessage,
                Expr::value(Option::<String>::None),
            )
            .filter(outgoing_sms::Column::Id.eq(id))
            .filter(outgoing_sms::Column::Status.eq(SmsStatus::Sending))
            .filter(outgoing_sms::Column::AttemptCount.eq(attempt))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Schedule another attempt after a transient failure.
    pub async fn mark_retrying(
        &self,
        id: Uuid,
        attempt: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(outgoing_sms::Column::Status, Expr::value(SmsStatus::Retrying))
            .col_expr(
                outgoing_sms::Column::NextAttemptAt,
                Expr::value(Some(next_attempt_at)),
            )
            .col_expr(
                outgoing_sms::Column::LastErrorMessage,
                Expr::value(Some(error.to_string())),
            )
            .filter(outgoing_sms::Column::Id.eq(id))
            .filter(outgoing_sms::Column::Status.eq(SmsStatus::Sending))
            .filter(outgoing_sms::Column::AttemptCount.eq(attempt))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Fail the message terminally.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        attempt: i32,
        error: &str,
        balance_failure: bool,
    ) -> Result<bool, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(outgoing_sms::Column::Status, Expr::value(SmsStatus::Failed))
            .col_expr(
                outgoing_sms::Column::NextAttemptAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                outgoing_sms::Column::LastErrorMessage,
                Expr::value(Some(error.to_string())),
            )
            .col_expr(
                outgoing_sms::Column::BalanceFailure,
                Expr::value(balance_failure),
            )
            .filter(outgoing_sms::Column::Id.eq(id))
            .filter(outgoing_sms::Column::Status.eq(SmsStatus::Sending))
            .filter(outgoing_sms::Column::AttemptCount.eq(attempt))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Withdraw a claimed message without sending it.
    pub async fn cancel_claimed(&self, id: Uuid, attempt: i32) -> Result<bool, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(outgoing_sms::Column::Status, Expr::value(SmsStatus::Cancelled))
            .col_expr(
                outgoing_sms::Column::NextAttemptAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .filter(outgoing_sms::Column::Id.eq(id))
            .filter(outgoing_sms::Column::Status.eq(SmsStatus::Sending))
            .filter(outgoing_sms::Column::AttemptCount.eq(attempt))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Cancel every not-yet-sent message of the given intents for a parcel.
    pub async fn cancel_pending_for_parcel(
        &self,
        parcel_id: Uuid,
        intents: &[SmsIntent],
    ) -> Result<u64, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(outgoing_sms::Column::Status, Expr::value(SmsStatus::Cancelled))
            .col_expr(
                outgoing_sms::Column::NextAttemptAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .filter(outgoing_sms::Column::ParcelId.eq(parcel_id))
            .filter(outgoing_sms::Column::Intent.is_in(intents.iter().copied()))
            .filter(outgoing_sms::Column::Status.is_in(SmsStatus::CANCELLABLE.iter().copied()))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected)
    }

    /// Re-render a message that has not been handed to the provider yet.
    ///
    /// Returns `false` if it was claimed in the meantime.
    pub async fn refresh_pending(
        &self,
        id: Uuid,
        text: &str,
        parcel_pickup_at: DateTime<Utc>,
        parcel_location_id: Uuid,
    ) -> Result<bool, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(outgoing_sms::Column::Text, Expr::value(text.to_string()))
            .col_expr(
                outgoing_sms::Column::ParcelPickupAt,
                Expr::value(Some(parcel_pickup_at)),
            )
            .col_expr(
                outgoing_sms::Column::ParcelLocationId,
                Expr::value(Some(parcel_location_id)),
            )
            .filter(outgoing_sms::Column::Id.eq(id))
            .filter(outgoing_sms::Column::Status.is_in(SmsStatus::SENDABLE.iter().copied()))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Apply a delivery report. Only the provider status fields are touched.
    ///
    /// Returns `false` when no message carries the provider id.
    pub async fn update_provider_status(
        &self,
        provider_message_id: &str,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(
                outgoing_sms::Column::ProviderStatus,
                Expr::value(Some(status.to_string())),
            )
            .col_expr(
                outgoing_sms::Column::ProviderStatusUpdatedAt,
                Expr::value(Some(now)),
            )
            .filter(outgoing_sms::Column::ProviderMessageId.eq(provider_message_id))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Hide a failed message from failure views and balance counts.
    pub async fn dismiss(
        &self,
        id: Uuid,
        dismissed_by: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<DismissResult, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(outgoing_sms::Column::DismissedAt, Expr::value(Some(now)))
            .col_expr(
                outgoing_sms::Column::DismissedByUserId,
                Expr::value(dismissed_by),
            )
            .filter(outgoing_sms::Column::Id.eq(id))
            .filter(outgoing_sms::Column::Status.eq(SmsStatus::Failed))
            .filter(outgoing_sms::Column::DismissedAt.is_null())
            .exec(self.conn)
            .await?;

        if result.rows_affected > 0 {
            return Ok(DismissResult::Dismissed);
        }

        match self.get_by_id(id).await? {
            None => Ok(DismissResult::NotFound),
            Some(m) if m.dismissed_at.is_some() => Ok(DismissResult::AlreadyDismissed),
            Some(_) => Ok(DismissResult::NotFailed),
        }
    }

    /// Undismissed failed messages, newest first.
    pub async fn list_failures(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<outgoing_sms::Model>, u64), DbErr> {
        let query = outgoing_sms::Entity::find()
            .filter(outgoing_sms::Column::Status.eq(SmsStatus::Failed))
            .filter(outgoing_sms::Column::DismissedAt.is_null());

        let total = query.clone().count(self.conn).await?;

        let messages = query
            .order_by_desc(outgoing_sms::Column::CreatedAt)
            .offset((page.saturating_sub(1)) * per_page)
            .limit(per_page)
            .all(self.conn)
            .await?;

        Ok((messages, total))
    }

    pub async fn failure_stats(&self) -> Result<FailureStats, DbErr> {
        let rows: Vec<(SmsIntent, bool)> = outgoing_sms::Entity::find()
            .select_only()
            .column(outgoing_sms::Column::Intent)
            .column(outgoing_sms::Column::BalanceFailure)
            .filter(outgoing_sms::Column::Status.eq(SmsStatus::Failed))
            .filter(outgoing_sms::Column::DismissedAt.is_null())
            .into_tuple()
            .all(self.conn)
            .await?;

        let total_failed = rows.len() as u64;
        let mut balance_failures = 0u64;
        let mut by_intent: HashMap<String, u64> = HashMap::new();

        for (intent, balance_failure) in rows {
            if balance_failure {
                balance_failures += 1;
            }
            *by_intent.entry(intent.to_string()).or_insert(0) += 1;
        }

        Ok(FailureStats {
            total_failed,
            balance_failures,
            by_intent,
        })
    }

    /// Undismissed messages that failed for lack of credit.
    pub async fn count_balance_failures(&self) -> Result<u64, DbErr> {
        outgoing_sms::Entity::find()
            .filter(outgoing_sms::Column::BalanceFailure.eq(true))
            .filter(outgoing_sms::Column::Status.eq(SmsStatus::Failed))
            .filter(outgoing_sms::Column::DismissedAt.is_null())
            .count(self.conn)
            .await
    }

    /// Put every undismissed balance failure back in the queue.
    ///
    /// Requeued rows are no longer `failed`, so a second call finds nothing.
    pub async fn requeue_balance_failures(&self, now: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = outgoing_sms::Entity::update_many()
            .col_expr(outgoing_sms::Column::Status, Expr::value(SmsStatus::Queued))
            .col_expr(outgoing_sms::Column::BalanceFailure, Expr::value(false))
            .col_expr(outgoing_sms::Column::AttemptCount, Expr::value(0))
            .col_expr(
                outgoing_sms::Column::LastErrorMessage,
                Expr::value(Option::<String>::None),
            )
            .col_expr(outgoing_sms::Column::NextAttemptAt, Expr::value(Some(now)))
            .filter(outgoing_sms::Column::Status.eq(SmsStatus::Failed))
            .filter(outgoing_sms::Column::BalanceFailure.eq(true))
            .filter(outgoing_sms::Column::DismissedAt.is_null())
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected)
    }
}

/// Create an SmsService with a DatabaseConnection.
pub fn sms_service(db: &DatabaseConnection) -> SmsService<'_, DatabaseConnection> {
    SmsService::new(db)
}
