use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::redact::redact_phone_numbers;
use common::{RetryDecision, RetryPolicy, SmsConfig, SmsIntent};
use gateway::{FailureClass, FailureClassifier, GatewayError, SmsGateway};
use sea_orm::{ConnectionTrait, DbErr, EntityTrait};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::entity::{food_parcel, outgoing_sms};

use super::service::SmsService;
use super::state::SmsState;
use super::stuck::recover_stale_claims;
use super::SmsError;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// What one processor run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReport {
    pub claimed: u64,
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
    /// Claimed messages withdrawn because their parcel was deleted.
    pub cancelled: u64,
    /// Due messages another processor claimed first.
    pub lost_claims: u64,
    pub stale_rescheduled: u64,
    pub stale_failed: u64,
    /// The batch stopped because the account is out of credit.
    pub paused_for_balance: bool,
    pub errors: u64,
}

enum Step {
    Continue,
    PauseBatch,
}

/// Claims due messages and hands them to the gateway.
pub struct QueueProcessor {
    gateway: Arc<dyn SmsGateway>,
    classifier: FailureClassifier,
    policy: RetryPolicy,
    enabled: bool,
    batch_size: u64,
    stale_after: chrono::Duration,
    send_timeout: Duration,
}

impl QueueProcessor {
    pub fn new(
        gateway: Arc<dyn SmsGateway>,
        classifier: FailureClassifier,
        config: &SmsConfig,
    ) -> Self {
        Self {
            gateway,
            classifier,
            policy: RetryPolicy::from(&config.retry),
            enabled: config.enabled,
            batch_size: config.batch_size.max(1),
            stale_after: chrono::Duration::minutes(config.stale_claim_minutes),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Upper bound on a single gateway call, on top of the client's own timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Send everything that is due, up to one batch.
    #[instrument(skip(self, conn))]
    pub async fn process_due_queue<C: ConnectionTrait>(
        &self,
        conn: &C,
        now: DateTime<Utc>,
    ) -> Result<ProcessReport, SmsError> {
        let mut report = ProcessReport::default();

        if !self.enabled {
            debug!("SMS processing disabled, skipping batch");
            return Ok(report);
        }

        // An unreachable balance endpoint must not block delivery.
        match self.gateway.check_balance().await {
            Ok(balance) if balance.credits <= 0 => {
                warn!(credits = balance.credits, "SMS balance exhausted, skipping batch");
                report.paused_for_balance = true;
                return Ok(report);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    error = %redact_phone_numbers(&e.to_string()),
                    "Balance check failed, sending anyway"
                );
            }
        }

        let recovery =
            recover_stale_claims(conn, now, self.stale_after, self.policy.max_attempts()).await?;
        report.stale_rescheduled = recovery.rescheduled;
        report.stale_failed = recovery.failed;

        let store = SmsService::new(conn);
        let due = store.due_messages(now, self.batch_size).await?;

        for (id, attempts) in due {
            match self.process_one(conn, &store, id, attempts, now, &mut report).await {
                Ok(Step::Continue) => {}
                Ok(Step::PauseBatch) => {
                    report.paused_for_balance = true;
                    break;
                }
                Err(e) => {
                    error!(message_id = %id, error = %e, "Failed to process message");
                    report.errors += 1;
                }
            }
        }

        info!(
            claimed = report.claimed,
            sent = report.sent,
            retried = report.retried,
            failed = report.failed,
            cancelled = report.cancelled,
            lost_claims = report.lost_claims,
            paused_for_balance = report.paused_for_balance,
            errors = report.errors,
            "Processor run finished"
        );

        Ok(report)
    }

    async fn process_one<C: ConnectionTrait>(
        &self,
        conn: &C,
        store: &SmsService<'_, C>,
        id: Uuid,
        attempts: i32,
        now: DateTime<Utc>,
        report: &mut ProcessReport,
    ) -> Result<Step, DbErr> {
        if !store.claim(id, attempts, now).await? {
            debug!(message_id = %id, "Message claimed elsewhere");
            report.lost_claims += 1;
            return Ok(Step::Continue);
        }
        report.claimed += 1;
        let attempt = attempts + 1;

        let Some(message) = store.get_by_id(id).await? else {
            return Ok(Step::Continue);
        };
        match message.state() {
            Ok(SmsState::Sending { .. }) => {}
            Ok(other) => {
                warn!(
                    message_id = %id,
                    status = %other.status(),
                    "Claimed message changed state, skipping"
                );
                return Ok(Step::Continue);
            }
            Err(e) => {
                error!(
                    message_id = %id,
                    error = %e,
                    "Claimed message is corrupt, leaving it for recovery"
                );
                report.errors += 1;
                return Ok(Step::Continue);
            }
        }

        if parcel_withdrawn(conn, &message).await? {
            if store.cancel_claimed(id, attempt).await? {
                report.cancelled += 1;
                info!(message_id = %id, intent = %message.intent, "Parcel deleted, SMS withdrawn");
            }
            return Ok(Step::Continue);
        }

        let result = match tokio::time::timeout(
            self.send_timeout,
            self.gateway.send(&message.to_phone, &message.text),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.send_timeout)),
        };

        let err = match result {
            Ok(receipt) => {
                if store
                    .mark_sent(id, attempt, &receipt.provider_message_id, now)
                    .await?
                {
                    report.sent += 1;
                    info!(message_id = %id, intent = %message.intent, attempt, "SMS sent");
                } else {
                    warn!(message_id = %id, "Claim lost before recording send");
                }
                return Ok(Step::Continue);
            }
            Err(err) => err,
        };

        let error_text = err.to_string();
        let logged = redact_phone_numbers(&error_text);

        match self.classifier.classify(&err) {
            FailureClass::Balance => {
                store.mark_failed(id, attempt, &error_text, true).await?;
                report.failed += 1;
                warn!(message_id = %id, error = %logged, "SMS balance exhausted, pausing batch");
                Ok(Step::PauseBatch)
            }
            FailureClass::Permanent => {
                store.mark_failed(id, attempt, &error_text, false).await?;
                report.failed += 1;
                warn!(message_id = %id, attempt, error = %logged, "SMS rejected");
                Ok(Step::Continue)
            }
            FailureClass::Transient => {
                match self.policy.decide(u32::try_from(attempt).unwrap_or(u32::MAX)) {
                    RetryDecision::Retry { delay, .. } => {
                        let delay = chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                        store
                            .mark_retrying(id, attempt, now + delay, &error_text)
                            .await?;
                        report.retried += 1;
                        info!(
                            message_id = %id,
                            attempt,
                            delay_secs = delay.num_seconds(),
                            error = %logged,
                            "SMS send failed, retrying"
                        );
                    }
                    RetryDecision::Exhausted { attempts } => {
                        store.mark_failed(id, attempt, &error_text, false).await?;
                        report.failed += 1;
                        warn!(message_id = %id, attempts, error = %logged, "SMS retries exhausted");
                    }
                }
                Ok(Step::Continue)
            }
        }
    }
}

/// Whether the message announces a parcel that has been deleted since it was queued.
///
/// Cancellation notices are about deleted parcels and always go out.
async fn parcel_withdrawn<C: ConnectionTrait>(
    conn: &C,
    message: &outgoing_sms::Model,
) -> Result<bool, DbErr> {
    let Some(parcel_id) = message.parcel_id else {
        return Ok(false);
    };
    if message.intent == SmsIntent::PickupCancelled {
        return Ok(false);
    }
    let parcel = food_parcel::Entity::find_by_id(parcel_id).one(conn).await?;
    Ok(parcel.is_none_or(|p| p.deleted_at.is_some()))
}
