use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per weekday, 0 = Monday through 6 = Sunday. Times are local to the
/// store's configured time zone.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schedule_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub weekday: i16,
    pub is_open: bool,
    pub opens_at: NaiveTime,
    pub closes_at: NaiveTime,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
