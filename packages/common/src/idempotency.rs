use std::fmt;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::intent::SmsIntent;

/// Placeholder used in keys of messages that do not reference a parcel.
pub const NO_PARCEL: &str = "none";

/// Deterministic de-duplication key for an outgoing SMS.
///
/// Stored under a unique constraint. Two enqueue attempts for the same logical
/// notification build the same key, so the second insert hits the constraint
/// and is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// `{intent}|{household_id}|{parcel_id or "none"}`.
    ///
    /// A new parcel cycle gets a new parcel id and therefore a fresh key.
    pub fn for_parcel(intent: SmsIntent, household_id: Uuid, parcel_id: Option<Uuid>) -> Self {
        let parcel = parcel_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| NO_PARCEL.to_string());
        Self(format!("{}|{}|{}", intent.as_str(), household_id, parcel))
    }

    /// `{intent}|{household_id}|{YYYY-MM-DD}` for intents that are not tied to a
    /// parcel and may recur at most once per day.
    pub fn time_boxed(intent: SmsIntent, household_id: Uuid, day: NaiveDate) -> Self {
        Self(format!(
            "{}|{}|{}",
            intent.as_str(),
            household_id,
            day.format("%Y-%m-%d")
        ))
    }

    /// Key for a manual resend. Embeds the replacement's id so it never collides
    /// with the dismissed original or an earlier resend.
    pub fn for_retry(original: &str, replacement_id: Uuid) -> Self {
        Self(format!("{original}|retry|{replacement_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}
