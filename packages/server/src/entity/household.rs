use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "household")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub first_name: String,
    pub phone_number: String,
    /// BCP-47 language tag. Only "sv" and "en" are rendered; anything else falls back to "sv".
    pub locale: String,

    /// Set once personal data has been scrubbed. Anonymized households never receive messages.
    #[sea_orm(indexed)]
    pub anonymized_at: Option<DateTimeUtc>,

    #[sea_orm(has_many)]
    pub parcels: HasMany<super::food_parcel::Entity>,

    #[sea_orm(has_many)]
    pub messages: HasMany<super::outgoing_sms::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
