use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A scheduled food parcel for one household at one location.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "food_parcel")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub household_id: Uuid,
    #[sea_orm(belongs_to, from = "household_id", to = "id")]
    pub household: HasOne<super::household::Entity>,

    pub pickup_location_id: Uuid,
    #[sea_orm(belongs_to, from = "pickup_location_id", to = "id")]
    pub pickup_location: HasOne<super::pickup_location::Entity>,

    /// Start of the pickup window.
    #[sea_orm(indexed)]
    pub pickup_date_time_earliest: DateTimeUtc,
    /// End of the pickup window.
    pub pickup_date_time_latest: DateTimeUtc,

    #[sea_orm(default_value = false)]
    pub is_picked_up: bool,
    pub picked_up_at: Option<DateTimeUtc>,
    pub no_show_at: Option<DateTimeUtc>,

    /// Soft delete marker; a deleted parcel is a cancelled pickup.
    pub deleted_at: Option<DateTimeUtc>,

    #[sea_orm(has_many)]
    pub messages: HasMany<super::outgoing_sms::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// When the parcel reached a terminal state (picked up or no-show), if it did.
    ///
    /// A parcel marked both ways reports the later of the two.
    pub fn terminal_at(&self) -> Option<DateTimeUtc> {
        let picked_up = if self.is_picked_up {
            self.picked_up_at
        } else {
            None
        };
        match (picked_up, self.no_show_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Past its pickup window without being picked up or marked no-show.
    pub fn is_unresolved(&self, now: DateTimeUtc) -> bool {
        self.deleted_at.is_none()
            && self.terminal_at().is_none()
            && self.pickup_date_time_latest < now
    }
}
