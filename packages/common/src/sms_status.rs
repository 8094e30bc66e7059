#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an outgoing SMS.
///
/// ```text
/// queued ──> sending ──> sent
///   │           ├──────> retrying ──> sending (loop)
///   │           └──────> failed ──(requeue)──> queued
///   └──> cancelled <── retrying
/// ```
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    /// Waiting for its first send attempt.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "queued"))]
    Queued,
    /// Claimed by a queue processor; a gateway call is in flight.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "sending"))]
    Sending,
    /// Accepted by the provider.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "sent"))]
    Sent,
    /// A transient failure happened; another attempt is scheduled.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "retrying"))]
    Retrying,
    /// Terminal failure. Only an explicit requeue or manual retry revives it.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "failed"))]
    Failed,
    /// Withdrawn before it was sent.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "cancelled"))]
    Cancelled,
}

impl SmsStatus {
    /// Statuses the queue processor may claim.
    pub const SENDABLE: &'static [SmsStatus] = &[Self::Queued, Self::Retrying];

    /// Statuses that may still be cancelled in place.
    pub const CANCELLABLE: &'static [SmsStatus] = &[Self::Queued, Self::Retrying];

    /// All possible status values.
    pub const ALL: &'static [SmsStatus] = &[
        Self::Queued,
        Self::Sending,
        Self::Sent,
        Self::Retrying,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns true if no further automatic transition will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the queue processor may pick this message up.
    pub fn is_sendable(&self) -> bool {
        Self::SENDABLE.contains(self)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SmsStatus) -> bool {
        use SmsStatus::*;
        matches!(
            (self, next),
            (Queued, Sending)
                | (Retrying, Sending)
                | (Sending, Sent)
                | (Sending, Retrying)
                | (Sending, Failed)
                | (Sending, Cancelled)
                | (Queued, Cancelled)
                | (Retrying, Cancelled)
                | (Failed, Queued)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SmsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for SmsStatus {
    fn default() -> Self {
        Self::Queued
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSmsStatusError {
    invalid: String,
}

impl fmt::Display for ParseSmsStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid SMS status '{}'. Valid values: {}",
            self.invalid,
            SmsStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseSmsStatusError {}

impl FromStr for SmsStatus {
    type Err = ParseSmsStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SmsStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseSmsStatusError {
                invalid: s.to_string(),
            })
    }
}
