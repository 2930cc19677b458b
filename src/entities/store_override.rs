use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const SINGLETON_ID: i16 = 1;

/// Singleton row of operator switches. Overrides take precedence over the
/// weekly schedule.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "store_override")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i16,
    /// Hard switch: storefront closed until an operator flips it back.
    pub manual_closed: bool,
    pub manual_message: Option<String>,
    /// Exceptional closure for the current day only (holiday, outage).
    pub closed_today: bool,
    pub closed_today_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Neutral override: nothing switched, weekly schedule decides.
    pub fn inactive() -> Self {
        Self {
            id: SINGLETON_ID,
            manual_closed: false,
            manual_message: None,
            closed_today: false,
            closed_today_reason: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}
