//! Read-only eligibility queries.
//!
//! Every scanner joins or sub-selects `household` with `anonymized_at IS NULL`
//! so anonymized households never leave the database. Scanners do not write;
//! the enqueue step turns their candidates into messages.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use common::{SmsIntent, SmsStatus};
use sea_orm::sea_query::{Query, SelectStatement};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use uuid::Uuid;

use crate::entity::{food_parcel, household, outgoing_sms, pickup_location};

use super::templates::PickupDetails;

/// A live parcel together with what is needed to write about it.
#[derive(Debug, Clone)]
pub struct ParcelCandidate {
    pub parcel: food_parcel::Model,
    pub household: household::Model,
    pub location: pickup_location::Model,
}

impl ParcelCandidate {
    pub fn pickup_details(&self) -> PickupDetails {
        PickupDetails {
            location_name: self.location.name.clone(),
            earliest: self.parcel.pickup_date_time_earliest,
            latest: self.parcel.pickup_date_time_latest,
        }
    }
}

/// A parcel whose time or location no longer matches what was written about it.
#[derive(Debug, Clone)]
pub struct RescheduleCandidate {
    pub target: ParcelCandidate,
    pub stale: StaleMessage,
}

/// The message rendered with the old details.
#[derive(Debug, Clone)]
pub enum StaleMessage {
    /// The reminder went out; the household needs an update.
    SentReminder(outgoing_sms::Model),
    /// The reminder is still queued or retrying.
    PendingReminder(outgoing_sms::Model),
    /// The update itself is still queued or retrying.
    PendingUpdate(outgoing_sms::Model),
}

/// A cancelled (soft-deleted) parcel that still has reminder traffic.
#[derive(Debug, Clone)]
pub struct CancellationCandidate {
    pub target: ParcelCandidate,
    /// A reminder or update already reached the household.
    pub notified: bool,
}

/// A household whose parcels have run out.
#[derive(Debug, Clone)]
pub struct EndedCandidate {
    pub household: household::Model,
    /// The most recent terminal parcel; anchors the idempotency key.
    pub last_parcel_id: Uuid,
    pub last_terminal_at: DateTime<Utc>,
}

const LIVE_STATUSES: [SmsStatus; 3] = [SmsStatus::Queued, SmsStatus::Retrying, SmsStatus::Sent];

/// Statuses after which a message can no longer be re-rendered.
const SETTLED_STATUSES: [SmsStatus; 4] = [
    SmsStatus::Sending,
    SmsStatus::Sent,
    SmsStatus::Failed,
    SmsStatus::Cancelled,
];

/// `SELECT id FROM household WHERE anonymized_at IS NULL`
fn active_households() -> SelectStatement {
    Query::select()
        .column(household::Column::Id)
        .from(household::Entity)
        .and_where(household::Column::AnonymizedAt.is_null())
        .to_owned()
}

/// `SELECT parcel_id FROM outgoing_sms WHERE intent IN (..) AND status IN (..)`
fn parcels_with_messages(intents: &[SmsIntent], statuses: &[SmsStatus]) -> SelectStatement {
    Query::select()
        .column(outgoing_sms::Column::ParcelId)
        .from(outgoing_sms::Entity)
        .and_where(outgoing_sms::Column::ParcelId.is_not_null())
        .and_where(outgoing_sms::Column::Intent.is_in(intents.iter().copied()))
        .and_where(outgoing_sms::Column::Status.is_in(statuses.iter().copied()))
        .to_owned()
}

fn snapshot_matches(message: &outgoing_sms::Model, parcel: &food_parcel::Model) -> bool {
    message.parcel_pickup_at == Some(parcel.pickup_date_time_earliest)
        && message.parcel_location_id == Some(parcel.pickup_location_id)
}

/// Live (not deleted, not terminal) parcels.
fn live_parcel() -> Condition {
    Condition::all()
        .add(food_parcel::Column::DeletedAt.is_null())
        .add(food_parcel::Column::IsPickedUp.eq(false))
        .add(food_parcel::Column::NoShowAt.is_null())
}

/// Attach household and location to parcels, dropping any whose household is anonymized.
async fn hydrate<C: ConnectionTrait>(
    conn: &C,
    parcels: Vec<food_parcel::Model>,
) -> Result<Vec<ParcelCandidate>, DbErr> {
    if parcels.is_empty() {
        return Ok(Vec::new());
    }

    let household_ids: Vec<Uuid> = parcels.iter().map(|p| p.household_id).collect();
    let location_ids: Vec<Uuid> = parcels.iter().map(|p| p.pickup_location_id).collect();

    let households: HashMap<Uuid, household::Model> = household::Entity::find()
        .filter(household::Column::Id.is_in(household_ids))
        .filter(household::Column::AnonymizedAt.is_null())
        .all(conn)
        .await?
        .into_iter()
        .map(|h| (h.id, h))
        .collect();

    let locations: HashMap<Uuid, pickup_location::Model> = pickup_location::Entity::find()
        .filter(pickup_location::Column::Id.is_in(location_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|l| (l.id, l))
        .collect();

    Ok(parcels
        .into_iter()
        .filter_map(|parcel| {
            let household = households.get(&parcel.household_id)?.clone();
            let location = locations.get(&parcel.pickup_location_id)?.clone();
            Some(ParcelCandidate {
                parcel,
                household,
                location,
            })
        })
        .collect())
}

/// Parcels starting within `lead` of `now` that have never had a reminder.
pub async fn find_due_reminders<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    lead: Duration,
) -> Result<Vec<ParcelCandidate>, DbErr> {
    let parcels = food_parcel::Entity::find()
        .filter(live_parcel())
        .filter(food_parcel::Column::PickupDateTimeEarliest.gt(now))
        .filter(food_parcel::Column::PickupDateTimeEarliest.lte(now + lead))
        .filter(food_parcel::Column::HouseholdId.in_subquery(active_households()))
        .filter(food_parcel::Column::Id.not_in_subquery(parcels_with_messages(
            &[SmsIntent::PickupReminder],
            SmsStatus::ALL,
        )))
        .order_by_asc(food_parcel::Column::PickupDateTimeEarliest)
        .all(conn)
        .await?;

    hydrate(conn, parcels).await
}

/// Upcoming parcels whose reminder or pending update was rendered with other details.
///
/// One update per parcel: once it is claimed, sent, failed or cancelled the
/// parcel is skipped. A still pending update is reported for re-rendering.
pub async fn find_reschedules<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
) -> Result<Vec<RescheduleCandidate>, DbErr> {
    let parcels = food_parcel::Entity::find()
        .filter(live_parcel())
        .filter(food_parcel::Column::PickupDateTimeEarliest.gt(now))
        .filter(food_parcel::Column::HouseholdId.in_subquery(active_households()))
        .filter(food_parcel::Column::Id.in_subquery(parcels_with_messages(
            &[SmsIntent::PickupReminder],
            &LIVE_STATUSES,
        )))
        .filter(food_parcel::Column::Id.not_in_subquery(parcels_with_messages(
            &[SmsIntent::PickupUpdated],
            &SETTLED_STATUSES,
        )))
        .all(conn)
        .await?;

    let targets = hydrate(conn, parcels).await?;
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let parcel_ids: Vec<Uuid> = targets.iter().map(|t| t.parcel.id).collect();
    let mut reminders: HashMap<Uuid, outgoing_sms::Model> = HashMap::new();
    let mut updates: HashMap<Uuid, outgoing_sms::Model> = HashMap::new();
    for message in outgoing_sms::Entity::find()
        .filter(outgoing_sms::Column::ParcelId.is_in(parcel_ids))
        .filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(outgoing_sms::Column::Intent.eq(SmsIntent::PickupReminder))
                        .add(outgoing_sms::Column::Status.is_in(LIVE_STATUSES)),
                )
                .add(
                    Condition::all()
                        .add(outgoing_sms::Column::Intent.eq(SmsIntent::PickupUpdated))
                        .add(
                            outgoing_sms::Column::Status
                                .is_in(SmsStatus::SENDABLE.iter().copied()),
                        ),
                ),
        )
        .order_by_asc(outgoing_sms::Column::CreatedAt)
        .all(conn)
        .await?
    {
        let Some(parcel_id) = message.parcel_id else {
            continue;
        };
        if message.intent == SmsIntent::PickupUpdated {
            updates.insert(parcel_id, message);
            continue;
        }
        // A sent reminder wins over a pending one for the same parcel.
        match reminders.get(&parcel_id) {
            Some(existing) if existing.status == SmsStatus::Sent => {}
            _ => {
                reminders.insert(parcel_id, message);
            }
        }
    }

    Ok(targets
        .into_iter()
        .filter_map(|target| {
            let stale = match updates.remove(&target.parcel.id) {
                Some(update) => {
                    if snapshot_matches(&update, &target.parcel) {
                        return None;
                    }
                    StaleMessage::PendingUpdate(update)
                }
                None => {
                    let reminder = reminders.remove(&target.parcel.id)?;
                    if snapshot_matches(&reminder, &target.parcel) {
                        return None;
                    }
                    if reminder.status == SmsStatus::Sent {
                        StaleMessage::SentReminder(reminder)
                    } else {
                        StaleMessage::PendingReminder(reminder)
                    }
                }
            };
            Some(RescheduleCandidate { target, stale })
        })
        .collect())
}

/// Cancelled upcoming parcels with reminder or update messages still in play.
pub async fn find_cancellations<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
) -> Result<Vec<CancellationCandidate>, DbErr> {
    let announced = [SmsIntent::PickupReminder, SmsIntent::PickupUpdated];

    let parcels = food_parcel::Entity::find()
        .filter(food_parcel::Column::DeletedAt.is_not_null())
        .filter(food_parcel::Column::PickupDateTimeEarliest.gt(now))
        .filter(food_parcel::Column::HouseholdId.in_subquery(active_households()))
        .filter(
            food_parcel::Column::Id.in_subquery(parcels_with_messages(&announced, &LIVE_STATUSES)),
        )
        .filter(food_parcel::Column::Id.not_in_subquery(parcels_with_messages(
            &[SmsIntent::PickupCancelled],
            SmsStatus::ALL,
        )))
        .all(conn)
        .await?;

    let targets = hydrate(conn, parcels).await?;
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let parcel_ids: Vec<Uuid> = targets.iter().map(|t| t.parcel.id).collect();
    let notified: Vec<Option<Uuid>> = outgoing_sms::Entity::find()
        .select_only()
        .column(outgoing_sms::Column::ParcelId)
        .filter(outgoing_sms::Column::ParcelId.is_in(parcel_ids))
        .filter(outgoing_sms::Column::Intent.is_in(announced))
        .filter(outgoing_sms::Column::Status.eq(SmsStatus::Sent))
        .into_tuple()
        .all(conn)
        .await?;

    Ok(targets
        .into_iter()
        .map(|target| {
            let notified = notified.contains(&Some(target.parcel.id));
            CancellationCandidate { target, notified }
        })
        .collect())
}

/// Start of the local calendar day containing `now`, as UTC.
pub fn start_of_local_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    now.with_timezone(&offset)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Decide whether one household's parcel history makes it eligible.
///
/// Returns the most recent terminal parcel and when it became terminal.
pub fn ended_anchor(
    parcels: &[food_parcel::Model],
    now: DateTime<Utc>,
    quiet_period: Duration,
    today_start: DateTime<Utc>,
) -> Option<(Uuid, DateTime<Utc>)> {
    let live: Vec<&food_parcel::Model> = parcels.iter().filter(|p| p.deleted_at.is_none()).collect();

    if live
        .iter()
        .any(|p| p.pickup_date_time_earliest >= today_start)
    {
        return None;
    }
    if live.iter().any(|p| p.is_unresolved(now)) {
        return None;
    }

    let (parcel_id, terminal_at) = live
        .iter()
        .filter_map(|p| p.terminal_at().map(|at| (p.id, at)))
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))?;

    (terminal_at <= now - quiet_period).then_some((parcel_id, terminal_at))
}

/// Households with nothing left to pick up, longest-waiting first.
///
/// Eligible when the most recent terminal parcel (by terminal timestamp) is at
/// least `quiet_period` old, nothing is scheduled from the start of today on,
/// and no past parcel is still unresolved.
pub async fn eligible_for_ended_notification<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    quiet_period: Duration,
    offset: FixedOffset,
) -> Result<Vec<EndedCandidate>, DbErr> {
    let threshold = now - quiet_period;

    let terminal_before_threshold = Condition::any()
        .add(
            Condition::all()
                .add(food_parcel::Column::IsPickedUp.eq(true))
                .add(food_parcel::Column::PickedUpAt.lte(threshold)),
        )
        .add(food_parcel::Column::NoShowAt.lte(threshold));

    let household_ids: Vec<Uuid> = food_parcel::Entity::find()
        .select_only()
        .column(food_parcel::Column::HouseholdId)
        .distinct()
        .filter(food_parcel::Column::DeletedAt.is_null())
        .filter(terminal_before_threshold)
        .filter(food_parcel::Column::HouseholdId.in_subquery(active_households()))
        .into_tuple()
        .all(conn)
        .await?;

    if household_ids.is_empty() {
        return Ok(Vec::new());
    }

    let households = household::Entity::find()
        .filter(household::Column::Id.is_in(household_ids.clone()))
        .filter(household::Column::AnonymizedAt.is_null())
        .all(conn)
        .await?;

    let mut parcels_by_household: HashMap<Uuid, Vec<food_parcel::Model>> = HashMap::new();
    for parcel in food_parcel::Entity::find()
        .filter(food_parcel::Column::HouseholdId.is_in(household_ids))
        .filter(food_parcel::Column::DeletedAt.is_null())
        .all(conn)
        .await?
    {
        parcels_by_household
            .entry(parcel.household_id)
            .or_default()
            .push(parcel);
    }

    let today_start = start_of_local_day(now, offset);

    let mut eligible: Vec<EndedCandidate> = households
        .into_iter()
        .filter_map(|household| {
            let parcels = parcels_by_household.get(&household.id)?;
            let (last_parcel_id, last_terminal_at) =
                ended_anchor(parcels, now, quiet_period, today_start)?;
            Some(EndedCandidate {
                household,
                last_parcel_id,
                last_terminal_at,
            })
        })
        .collect();

    eligible.sort_by(|a, b| {
        a.last_terminal_at
            .cmp(&b.last_terminal_at)
            .then(a.household.id.cmp(&b.household.id))
    });

    Ok(eligible)
}
