use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pickup_location")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,
    pub street_address: String,

    #[sea_orm(has_many)]
    pub parcels: HasMany<super::food_parcel::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
