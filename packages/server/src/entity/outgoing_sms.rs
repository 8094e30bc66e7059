use common::{SmsIntent, SmsStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One outbound notification and its delivery bookkeeping.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "outgoing_sms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub household_id: Uuid,
    #[sea_orm(belongs_to, from = "household_id", to = "id")]
    pub household: HasOne<super::household::Entity>,

    /// Required for parcel-scoped intents, NULL otherwise.
    #[sea_orm(indexed)]
    pub parcel_id: Option<Uuid>,
    #[sea_orm(belongs_to, from = "parcel_id", to = "id")]
    pub parcel: HasOne<super::food_parcel::Entity>,

    #[sea_orm(indexed)]
    pub intent: SmsIntent,
    #[sea_orm(indexed)]
    pub status: SmsStatus,

    pub to_phone: String,
    #[sea_orm(column_type = "Text")]
    pub text: String,

    /// `{intent}|{household_id}|{parcel_id or "none"}`, or a variant thereof.
    #[sea_orm(unique)]
    pub idempotency_key: String,

    #[sea_orm(default_value = 0)]
    pub attempt_count: i32,
    pub next_attempt_at: Option<DateTimeUtc>,
    /// When the current or latest attempt was claimed.
    pub last_attempt_at: Option<DateTimeUtc>,
    /// Raw provider error. Redact before showing it to anyone.
    #[sea_orm(column_type = "Text")]
    pub last_error_message: Option<String>,

    #[sea_orm(default_value = false, indexed)]
    pub balance_failure: bool,

    #[sea_orm(indexed)]
    pub provider_message_id: Option<String>,
    pub provider_status: Option<String>,
    pub provider_status_updated_at: Option<DateTimeUtc>,

    pub sent_at: Option<DateTimeUtc>,
    pub dismissed_at: Option<DateTimeUtc>,
    pub dismissed_by_user_id: Option<i32>,

    /// Pickup start the text was rendered with; reschedule detection compares against it.
    pub parcel_pickup_at: Option<DateTimeUtc>,
    /// Pickup location the text was rendered with.
    pub parcel_location_id: Option<Uuid>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
