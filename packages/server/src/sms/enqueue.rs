use chrono::{DateTime, Duration, FixedOffset, Utc};
use common::{IdempotencyKey, SmsConfig, SmsIntent};
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::entity::household;

use super::scanners::{self, ParcelCandidate, StaleMessage};
use super::service::{InsertOutcome, NewMessage, SmsService};
use super::templates::{self, Locale};
use super::SmsError;

/// What one enqueue run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReport {
    pub reminders: u64,
    pub updates: u64,
    /// Pending reminders and updates re-rendered after a reschedule.
    pub refreshed: u64,
    pub cancellations: u64,
    /// Pending reminders and updates cancelled because their parcel was.
    pub cancelled_in_place: u64,
    pub ended: u64,
    /// Candidates whose idempotency key was already taken.
    pub already_handled: u64,
    /// Scanner or insert failures; each was logged and skipped.
    pub errors: u64,
}

impl EnqueueReport {
    fn record(&mut self, outcome: InsertOutcome) -> bool {
        match outcome {
            InsertOutcome::Inserted(_) => true,
            InsertOutcome::AlreadyExists => {
                self.already_handled += 1;
                false
            }
        }
    }
}

fn parcel_message(
    intent: SmsIntent,
    candidate: &ParcelCandidate,
    offset: FixedOffset,
) -> NewMessage {
    let household = &candidate.household;
    let parcel = &candidate.parcel;
    NewMessage {
        household_id: household.id,
        parcel_id: Some(parcel.id),
        intent,
        to_phone: household.phone_number.clone(),
        text: templates::render(
            intent,
            Locale::from_tag(&household.locale),
            &household.first_name,
            Some(&candidate.pickup_details()),
            offset,
        ),
        idempotency_key: IdempotencyKey::for_parcel(intent, household.id, Some(parcel.id)),
        parcel_pickup_at: Some(parcel.pickup_date_time_earliest),
        parcel_location_id: Some(parcel.pickup_location_id),
    }
}

/// Run every scanner and queue what they find.
///
/// A failing scanner or insert is logged and skipped; the other scanners still run.
#[instrument(skip(conn, config))]
pub async fn enqueue_eligible_notifications<C: ConnectionTrait>(
    conn: &C,
    config: &SmsConfig,
    now: DateTime<Utc>,
) -> Result<EnqueueReport, SmsError> {
    let mut report = EnqueueReport::default();
    let offset = config.local_offset();

    if let Err(e) = enqueue_reminders(conn, config, now, offset, &mut report).await {
        error!(error = %e, "Reminder scan failed");
        report.errors += 1;
    }
    if let Err(e) = enqueue_reschedules(conn, now, offset, &mut report).await {
        error!(error = %e, "Reschedule scan failed");
        report.errors += 1;
    }
    if let Err(e) = enqueue_cancellations(conn, now, offset, &mut report).await {
        error!(error = %e, "Cancellation scan failed");
        report.errors += 1;
    }
    if let Err(e) = enqueue_ended(conn, config, now, offset, &mut report).await {
        error!(error = %e, "Ended scan failed");
        report.errors += 1;
    }

    info!(
        reminders = report.reminders,
        updates = report.updates,
        refreshed = report.refreshed,
        cancellations = report.cancellations,
        cancelled_in_place = report.cancelled_in_place,
        ended = report.ended,
        already_handled = report.already_handled,
        errors = report.errors,
        "Enqueue run finished"
    );

    Ok(report)
}

async fn enqueue_reminders<C: ConnectionTrait>(
    conn: &C,
    config: &SmsConfig,
    now: DateTime<Utc>,
    offset: FixedOffset,
    report: &mut EnqueueReport,
) -> Result<(), DbErr> {
    let lead = Duration::hours(config.reminder_lead_hours);
    let candidates = scanners::find_due_reminders(conn, now, lead).await?;
    let store = SmsService::new(conn);

    for candidate in &candidates {
        let message = parcel_message(SmsIntent::PickupReminder, candidate, offset);
        match store.enqueue(message, now).await {
            Ok(outcome) => {
                if report.record(outcome) {
                    report.reminders += 1;
                }
            }
            Err(e) => {
                error!(parcel_id = %candidate.parcel.id, error = %e, "Failed to queue reminder");
                report.errors += 1;
            }
        }
    }

    Ok(())
}

async fn enqueue_reschedules<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    offset: FixedOffset,
    report: &mut EnqueueReport,
) -> Result<(), DbErr> {
    let candidates = scanners::find_reschedules(conn, now).await?;
    let store = SmsService::new(conn);

    for candidate in &candidates {
        let parcel = &candidate.target.parcel;

        let (pending, intent) = match &candidate.stale {
            StaleMessage::SentReminder(_) => {
                let message = parcel_message(SmsIntent::PickupUpdated, &candidate.target, offset);
                match store.enqueue(message, now).await {
                    Ok(outcome) => {
                        if report.record(outcome) {
                            report.updates += 1;
                        }
                    }
                    Err(e) => {
                        error!(parcel_id = %parcel.id, error = %e, "Failed to queue update");
                        report.errors += 1;
                    }
                }
                continue;
            }
            // The household has not seen the old details yet; correct the pending text instead.
            StaleMessage::PendingReminder(m) => (m, SmsIntent::PickupReminder),
            StaleMessage::PendingUpdate(m) => (m, SmsIntent::PickupUpdated),
        };

        let fresh = parcel_message(intent, &candidate.target, offset);
        match store
            .refresh_pending(
                pending.id,
                &fresh.text,
                parcel.pickup_date_time_earliest,
                parcel.pickup_location_id,
            )
            .await
        {
            Ok(true) => report.refreshed += 1,
            Ok(false) => debug!(message_id = %pending.id, "Message claimed before refresh"),
            Err(e) => {
                error!(parcel_id = %parcel.id, error = %e, "Failed to refresh pending message");
                report.errors += 1;
            }
        }
    }

    Ok(())
}

async fn enqueue_cancellations<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    offset: FixedOffset,
    report: &mut EnqueueReport,
) -> Result<(), DbErr> {
    let candidates = scanners::find_cancellations(conn, now).await?;
    let store = SmsService::new(conn);

    for candidate in &candidates {
        let parcel_id = candidate.target.parcel.id;

        match store
            .cancel_pending_for_parcel(
                parcel_id,
                &[SmsIntent::PickupReminder, SmsIntent::PickupUpdated],
            )
            .await
        {
            Ok(n) => report.cancelled_in_place += n,
            Err(e) => {
                error!(parcel_id = %parcel_id, error = %e, "Failed to cancel pending messages");
                report.errors += 1;
                continue;
            }
        }

        if !candidate.notified {
            continue;
        }

        let message = parcel_message(SmsIntent::PickupCancelled, &candidate.target, offset);
        match store.enqueue(message, now).await {
            Ok(outcome) => {
                if report.record(outcome) {
                    report.cancellations += 1;
                }
            }
            Err(e) => {
                error!(parcel_id = %parcel_id, error = %e, "Failed to queue cancellation");
                report.errors += 1;
            }
        }
    }

    Ok(())
}

async fn enqueue_ended<C: ConnectionTrait>(
    conn: &C,
    config: &SmsConfig,
    now: DateTime<Utc>,
    offset: FixedOffset,
    report: &mut EnqueueReport,
) -> Result<(), DbErr> {
    let quiet = Duration::hours(config.ended_after_hours);
    let candidates = scanners::eligible_for_ended_notification(conn, now, quiet, offset).await?;
    let store = SmsService::new(conn);

    for candidate in &candidates {
        let household = &candidate.household;
        let message = NewMessage {
            household_id: household.id,
            parcel_id: None,
            intent: SmsIntent::FoodParcelsEnded,
            to_phone: household.phone_number.clone(),
            text: templates::render(
                SmsIntent::FoodParcelsEnded,
                Locale::from_tag(&household.locale),
                &household.first_name,
                None,
                offset,
            ),
            // Anchored on the last parcel so a later parcel cycle can end again.
            idempotency_key: IdempotencyKey::for_parcel(
                SmsIntent::FoodParcelsEnded,
                household.id,
                Some(candidate.last_parcel_id),
            ),
            parcel_pickup_at: None,
            parcel_location_id: None,
        };

        match store.enqueue(message, now).await {
            Ok(outcome) => {
                if report.record(outcome) {
                    report.ended += 1;
                }
            }
            Err(e) => {
                error!(household_id = %household.id, error = %e, "Failed to queue ended message");
                report.errors += 1;
            }
        }
    }

    Ok(())
}

/// Queue the enrolment notice for a household, at most once per local day.
///
/// Returns `None` when the household does not exist or is anonymized.
#[instrument(skip(conn, config))]
pub async fn enqueue_enrolment<C: ConnectionTrait>(
    conn: &C,
    config: &SmsConfig,
    household_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<InsertOutcome>, SmsError> {
    let Some(household) = household::Entity::find_by_id(household_id)
        .filter(household::Column::AnonymizedAt.is_null())
        .one(conn)
        .await?
    else {
        return Ok(None);
    };

    let offset = config.local_offset();
    let day = now.with_timezone(&offset).date_naive();

    let message = NewMessage {
        household_id: household.id,
        parcel_id: None,
        intent: SmsIntent::ConsentEnrolment,
        to_phone: household.phone_number.clone(),
        text: templates::render(
            SmsIntent::ConsentEnrolment,
            Locale::from_tag(&household.locale),
            &household.first_name,
            None,
            offset,
        ),
        idempotency_key: IdempotencyKey::time_boxed(SmsIntent::ConsentEnrolment, household.id, day),
        parcel_pickup_at: None,
        parcel_location_id: None,
    };

    let outcome = SmsService::new(conn).enqueue(message, now).await?;
    Ok(Some(outcome))
}
