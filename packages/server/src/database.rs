use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use tracing::debug;

use crate::entity::{food_parcel, household, outgoing_sms, pickup_location};

pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    // Set connection pool options
    opt.max_connections(20)
        .min_connections(2)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(60))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    create_schema(&db).await?;

    Ok(db)
}

/// Create every table and single-column index that does not exist yet.
///
/// Tables are created parents first so foreign keys resolve.
pub async fn create_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    create_entity(db, household::Entity).await?;
    create_entity(db, pickup_location::Entity).await?;
    create_entity(db, food_parcel::Entity).await?;
    create_entity(db, outgoing_sms::Entity).await?;
    Ok(())
}

async fn create_entity<C, E>(db: &C, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let table = schema
        .create_table_from_entity(entity)
        .if_not_exists()
        .to_owned();
    db.execute_raw(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        db.execute_raw(backend.build(index.if_not_exists())).await?;
    }

    debug!(table = entity.table_name(), "Ensured table exists");
    Ok(())
}
