use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::redact::redact_optional;
use common::{SmsIntent, SmsStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::outgoing_sms;
use crate::error::AppError;
use crate::sms::{BalanceStatus, EnqueueReport, FailureStats, ProcessReport};

use super::shared::Pagination;

/// Provider credit and stored balance failures.
#[derive(Serialize, utoipa::ToSchema)]
pub struct BalanceStatusResponse {
    /// True when credits are zero or undismissed balance failures exist.
    #[schema(example = true)]
    pub has_insufficient_balance: bool,
    /// Remaining credits (null if the balance check failed).
    #[schema(example = 0)]
    pub credits: Option<i64>,
    /// Why the balance check failed, if it did.
    pub balance_check_error: Option<String>,
    /// Undismissed messages that failed for lack of credit.
    #[schema(example = 4)]
    pub failed_count: u64,
}

impl From<BalanceStatus> for BalanceStatusResponse {
    fn from(s: BalanceStatus) -> Self {
        Self {
            has_insufficient_balance: s.has_insufficient_balance,
            credits: s.credits,
            balance_check_error: s.balance_check_error,
            failed_count: s.failed_count,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct RequeueResponse {
    /// Messages moved back to the queue.
    #[schema(example = 4)]
    pub requeued: u64,
}

/// A failed message as shown to administrators. Phone number and body are omitted.
#[derive(Serialize, utoipa::ToSchema)]
pub struct FailedMessageResponse {
    pub id: Uuid,
    pub household_id: Uuid,
    pub parcel_id: Option<Uuid>,
    #[schema(example = "pickup_reminder")]
    pub intent: SmsIntent,
    #[schema(example = "failed")]
    pub status: SmsStatus,
    #[schema(example = 3)]
    pub attempt_count: i32,
    /// Provider error with phone numbers redacted.
    #[schema(example = "Provider rejected message (HTTP 400): invalid recipient [phone]")]
    pub last_error_message: Option<String>,
    #[schema(example = false)]
    pub balance_failure: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[schema(example = "2025-09-01T08:00:00Z")]
    pub created_at: DateTime<Utc>,
}

impl From<outgoing_sms::Model> for FailedMessageResponse {
    fn from(m: outgoing_sms::Model) -> Self {
        Self {
            id: m.id,
            household_id: m.household_id,
            parcel_id: m.parcel_id,
            intent: m.intent,
            status: m.status,
            attempt_count: m.attempt_count,
            last_error_message: redact_optional(m.last_error_message.as_deref()),
            balance_failure: m.balance_failure,
            last_attempt_at: m.last_attempt_at,
            created_at: m.created_at,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct FailureListResponse {
    pub data: Vec<FailedMessageResponse>,
    pub pagination: Pagination,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct FailureStatsResponse {
    #[schema(example = 12)]
    pub total_failed: u64,
    #[schema(example = 4)]
    pub balance_failures: u64,
    /// Undismissed failures keyed by intent.
    pub by_intent: HashMap<String, u64>,
}

impl From<FailureStats> for FailureStatsResponse {
    fn from(s: FailureStats) -> Self {
        Self {
            total_failed: s.total_failed,
            balance_failures: s.balance_failures,
            by_intent: s.by_intent,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct RetryResponse {
    /// The dismissed original.
    pub original_id: Uuid,
    /// The newly queued copy.
    pub replacement_id: Uuid,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DismissResponse {
    pub id: Uuid,
    #[schema(example = true)]
    pub dismissed: bool,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct EnqueueJobResponse {
    pub reminders: u64,
    pub updates: u64,
    pub refreshed: u64,
    pub cancellations: u64,
    pub cancelled_in_place: u64,
    pub ended: u64,
    pub already_handled: u64,
    pub errors: u64,
}

impl From<EnqueueReport> for EnqueueJobResponse {
    fn from(r: EnqueueReport) -> Self {
        Self {
            reminders: r.reminders,
            updates: r.updates,
            refreshed: r.refreshed,
            cancellations: r.cancellations,
            cancelled_in_place: r.cancelled_in_place,
            ended: r.ended,
            already_handled: r.already_handled,
            errors: r.errors,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ProcessJobResponse {
    pub claimed: u64,
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub lost_claims: u64,
    pub stale_rescheduled: u64,
    pub stale_failed: u64,
    pub paused_for_balance: bool,
    pub errors: u64,
}

impl From<ProcessReport> for ProcessJobResponse {
    fn from(r: ProcessReport) -> Self {
        Self {
            claimed: r.claimed,
            sent: r.sent,
            retried: r.retried,
            failed: r.failed,
            cancelled: r.cancelled,
            lost_claims: r.lost_claims,
            stale_rescheduled: r.stale_rescheduled,
            stale_failed: r.stale_failed,
            paused_for_balance: r.paused_for_balance,
            errors: r.errors,
        }
    }
}

/// Delivery report pushed by the SMS provider.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StatusCallbackRequest {
    #[schema(example = "a1b2c3d4")]
    pub provider_message_id: String,
    #[schema(example = "delivered")]
    pub status: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct StatusCallbackResponse {
    /// False when no message carries the provider id. Not an error.
    #[schema(example = true)]
    pub updated: bool,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct EnrolmentResponse {
    /// True if a new message was queued, false if one was already queued today.
    #[schema(example = true)]
    pub queued: bool,
    pub message_id: Option<Uuid>,
}

/// Validate a delivery report before touching the store.
pub fn validate_status_callback(req: &StatusCallbackRequest) -> Result<(), AppError> {
    if req.provider_message_id.trim().is_empty() {
        return Err(AppError::Validation(
            "provider_message_id must not be empty".into(),
        ));
    }
    let status = req.status.trim();
    if status.is_empty() || status.chars().count() > 64 {
        return Err(AppError::Validation(
            "status must be 1-64 characters".into(),
        ));
    }
    Ok(())
}
