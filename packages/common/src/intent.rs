#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What an outgoing SMS is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum SmsIntent {
    /// Upcoming pickup.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "pickup_reminder"))]
    PickupReminder,
    /// Pickup time or location changed after a reminder went out.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "pickup_updated"))]
    PickupUpdated,
    /// Pickup cancelled after a reminder went out.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "pickup_cancelled"))]
    PickupCancelled,
    /// Household has no more parcels scheduled.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "food_parcels_ended"))]
    FoodParcelsEnded,
    /// Welcome / privacy notice when a household is enrolled.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "consent_enrolment"))]
    ConsentEnrolment,
}

impl SmsIntent {
    pub const ALL: &'static [SmsIntent] = &[
        Self::PickupReminder,
        Self::PickupUpdated,
        Self::PickupCancelled,
        Self::FoodParcelsEnded,
        Self::ConsentEnrolment,
    ];

    /// Intents an administrator may resend by hand.
    pub const RETRYABLE: &'static [SmsIntent] = &[
        Self::PickupReminder,
        Self::PickupUpdated,
        Self::PickupCancelled,
    ];

    /// Whether messages with this intent must reference a parcel.
    pub fn is_parcel_scoped(&self) -> bool {
        matches!(
            self,
            Self::PickupReminder | Self::PickupUpdated | Self::PickupCancelled
        )
    }

    pub fn is_manually_retryable(&self) -> bool {
        Self::RETRYABLE.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PickupReminder => "pickup_reminder",
            Self::PickupUpdated => "pickup_updated",
            Self::PickupCancelled => "pickup_cancelled",
            Self::FoodParcelsEnded => "food_parcels_ended",
            Self::ConsentEnrolment => "consent_enrolment",
        }
    }
}

impl fmt::Display for SmsIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SmsIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SmsIntent::ALL
            .iter()
            .copied()
            .find(|intent| intent.as_str() == s)
            .ok_or_else(|| format!("Invalid SMS intent '{s}'"))
    }
}
