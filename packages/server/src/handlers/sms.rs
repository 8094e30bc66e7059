use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, require_shared_secret};
use crate::extractors::json::AppJson;
use crate::models::shared::{PageParams, Pagination};
use crate::models::sms::*;
use crate::sms::{
    self, DismissResult, InsertOutcome, RetryOutcome, enqueue_eligible_notifications, sms_service,
};
use crate::state::AppState;

const SMS_MANAGE: &str = "sms:manage";
const CRON_SECRET_HEADER: &str = "X-Cron-Secret";
const CALLBACK_SECRET_HEADER: &str = "X-Callback-Secret";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Get the SMS balance status.
#[utoipa::path(
    get,
    path = "/balance",
    tag = "SMS",
    operation_id = "getSmsBalance",
    summary = "Get SMS balance status",
    description = "Queries provider credit and counts undismissed balance failures. The two signals are computed independently: a failed balance check still reports `failed_count`. Requires `sms:manage` permission.",
    responses(
        (status = 200, description = "Balance status", body = BalanceStatusResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn get_balance(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<BalanceStatusResponse>, AppError> {
    auth_user.require_permission(SMS_MANAGE)?;

    let status = state.balance_monitor().get_balance_status(&state.db).await?;

    Ok(Json(status.into()))
}

/// Requeue balance failures.
#[utoipa::path(
    post,
    path = "/balance/requeue",
    tag = "SMS",
    operation_id = "requeueSmsBalanceFailures",
    summary = "Requeue balance failures",
    description = "Moves every undismissed balance failure back to `queued` with a fresh attempt count. Call after topping up credit. Idempotent: a second call returns 0. Requires `sms:manage` permission.",
    responses(
        (status = 200, description = "Number of requeued messages", body = RequeueResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn requeue_balance_failures(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<RequeueResponse>, AppError> {
    auth_user.require_permission(SMS_MANAGE)?;

    let requeued = state
        .balance_monitor()
        .requeue_balance_failures(&state.db, Utc::now())
        .await?;

    info!(requeued, user_id = auth_user.user_id, "Balance failures requeued");

    Ok(Json(RequeueResponse { requeued }))
}

/// List failed messages.
#[utoipa::path(
    get,
    path = "/failures",
    tag = "SMS",
    operation_id = "listSmsFailures",
    summary = "List failed messages",
    description = "Returns undismissed failed messages, newest first. Error text has phone numbers redacted. Requires `sms:manage` permission.",
    params(PageParams),
    responses(
        (status = 200, description = "Failed messages", body = FailureListResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn list_failures(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<FailureListResponse>, AppError> {
    auth_user.require_permission(SMS_MANAGE)?;

    let (page, per_page) = params.resolve();
    let (messages, total) = sms_service(&state.db)
        .list_failures(page, per_page)
        .await?;

    Ok(Json(FailureListResponse {
        data: messages.into_iter().map(Into::into).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

/// Get failure statistics.
#[utoipa::path(
    get,
    path = "/failures/stats",
    tag = "SMS",
    operation_id = "getSmsFailureStats",
    summary = "Get failure statistics",
    description = "Counts undismissed failed messages, in total, as balance failures and by intent. Requires `sms:manage` permission.",
    responses(
        (status = 200, description = "Failure statistics", body = FailureStatsResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn get_failure_stats(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<FailureStatsResponse>, AppError> {
    auth_user.require_permission(SMS_MANAGE)?;

    let stats = sms_service(&state.db).failure_stats().await?;

    Ok(Json(stats.into()))
}

/// Resend a failed message.
#[utoipa::path(
    post,
    path = "/messages/{id}/retry",
    tag = "SMS",
    operation_id = "retrySmsMessage",
    summary = "Resend a failed message",
    description = "Dismisses the failed message and queues a copy in one transaction. Only parcel reminders, updates and cancellations can be resent, at least an hour before pickup and not within five minutes of another message for the same parcel. Requires `sms:manage` permission.",
    params(("id" = Uuid, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Replacement queued", body = RetryResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Message not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Message cannot be resent (INVALID_ACTION)", body = ErrorBody),
        (status = 422, description = "Pickup starts too soon (TOO_LATE)", body = ErrorBody),
        (status = 429, description = "Parcel messaged moments ago (COOLDOWN_ACTIVE)", body = ErrorBody,
            headers(("Retry-After" = u64, description = "Seconds until the cooldown ends"))),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn retry_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RetryResponse>, AppError> {
    auth_user.require_permission(SMS_MANAGE)?;

    let outcome = sms::retry_message(
        &state.db,
        &state.config.sms.manual_retry,
        id,
        auth_user.user_id,
        Utc::now(),
    )
    .await?;

    match outcome {
        RetryOutcome::Retried {
            original_id,
            replacement_id,
        } => Ok(Json(RetryResponse {
            original_id,
            replacement_id,
        })),
        RetryOutcome::Rejected(rejection) => Err(rejection.into()),
    }
}

/// Dismiss a failed message.
#[utoipa::path(
    post,
    path = "/messages/{id}/dismiss",
    tag = "SMS",
    operation_id = "dismissSmsMessage",
    summary = "Dismiss a failed message",
    description = "Hides a failed message from failure views and balance counts. The row is kept for audit. Requires `sms:manage` permission.",
    params(("id" = Uuid, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Message dismissed", body = DismissResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Message not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Not failed or already dismissed (INVALID_ACTION)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn dismiss_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DismissResponse>, AppError> {
    auth_user.require_permission(SMS_MANAGE)?;

    let result = sms_service(&state.db)
        .dismiss(id, Some(auth_user.user_id), Utc::now())
        .await?;

    match result {
        DismissResult::Dismissed => {
            info!(message_id = %id, user_id = auth_user.user_id, "Failed message dismissed");
            Ok(Json(DismissResponse { id, dismissed: true }))
        }
        DismissResult::NotFound => Err(AppError::NotFound(format!("Message {id} not found"))),
        DismissResult::AlreadyDismissed => Err(AppError::InvalidAction(
            "Message is already dismissed".into(),
        )),
        DismissResult::NotFailed => Err(AppError::InvalidAction(
            "Only failed messages can be dismissed".into(),
        )),
    }
}

/// Queue the enrolment notice for a household.
#[utoipa::path(
    post,
    path = "/households/{id}/enrolment",
    tag = "SMS",
    operation_id = "enqueueSmsEnrolment",
    summary = "Queue enrolment notice",
    description = "Queues the welcome and privacy notice for a newly enrolled household, at most once per local day. Requires `sms:manage` permission.",
    params(("id" = Uuid, Path, description = "Household ID")),
    responses(
        (status = 200, description = "Enrolment notice queued or already queued today", body = EnrolmentResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Household not found or anonymized (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn enqueue_enrolment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EnrolmentResponse>, AppError> {
    auth_user.require_permission(SMS_MANAGE)?;

    let outcome = sms::enqueue_enrolment(&state.db, &state.config.sms, id, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Household {id} not found")))?;

    Ok(Json(match outcome {
        InsertOutcome::Inserted(message_id) => EnrolmentResponse {
            queued: true,
            message_id: Some(message_id),
        },
        InsertOutcome::AlreadyExists => EnrolmentResponse {
            queued: false,
            message_id: None,
        },
    }))
}

/// Run the eligibility scanners.
#[utoipa::path(
    post,
    path = "/jobs/enqueue",
    tag = "SMS Jobs",
    operation_id = "runSmsEnqueue",
    summary = "Queue due notifications",
    description = "Runs every eligibility scanner and queues what they find. Safe to call concurrently. Authenticated with the `X-Cron-Secret` header.",
    responses(
        (status = 200, description = "Enqueue summary", body = EnqueueJobResponse),
        (status = 401, description = "Missing or wrong secret (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers))]
pub async fn run_enqueue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EnqueueJobResponse>, AppError> {
    require_shared_secret(
        header(&headers, CRON_SECRET_HEADER),
        &state.config.auth.cron_secret,
    )?;

    let report = enqueue_eligible_notifications(&state.db, &state.config.sms, Utc::now()).await?;

    Ok(Json(report.into()))
}

/// Send due messages.
#[utoipa::path(
    post,
    path = "/jobs/process",
    tag = "SMS Jobs",
    operation_id = "runSmsProcess",
    summary = "Send due messages",
    description = "Claims and sends one batch of due messages. Overlapping calls never send a message twice. Authenticated with the `X-Cron-Secret` header.",
    responses(
        (status = 200, description = "Processing summary", body = ProcessJobResponse),
        (status = 401, description = "Missing or wrong secret (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers))]
pub async fn run_process(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProcessJobResponse>, AppError> {
    require_shared_secret(
        header(&headers, CRON_SECRET_HEADER),
        &state.config.auth.cron_secret,
    )?;

    let report = state
        .processor()
        .process_due_queue(&state.db, Utc::now())
        .await?;

    Ok(Json(report.into()))
}

/// Receive a delivery report.
#[utoipa::path(
    post,
    path = "/callbacks/status",
    tag = "SMS Jobs",
    operation_id = "smsStatusCallback",
    summary = "Provider delivery report",
    description = "Records the provider's delivery status for a sent message. Unknown provider ids are ignored and reported as `updated: false`. Authenticated with the `X-Callback-Secret` header.",
    request_body = StatusCallbackRequest,
    responses(
        (status = 200, description = "Callback handled", body = StatusCallbackResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Missing or wrong secret (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers, payload))]
pub async fn status_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(payload): AppJson<StatusCallbackRequest>,
) -> Result<Json<StatusCallbackResponse>, AppError> {
    require_shared_secret(
        header(&headers, CALLBACK_SECRET_HEADER),
        &state.config.auth.callback_secret,
    )?;
    validate_status_callback(&payload)?;

    let updated = sms_service(&state.db)
        .update_provider_status(
            payload.provider_message_id.trim(),
            payload.status.trim(),
            Utc::now(),
        )
        .await?;

    if !updated {
        warn!(
            provider_message_id = %payload.provider_message_id,
            "Delivery report for unknown message ignored"
        );
    }

    Ok(Json(StatusCallbackResponse { updated }))
}
