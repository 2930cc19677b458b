use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-product stock accounting. A row with `day = None` is the running
/// record; rows with `day = Some(..)` are per-calendar-day snapshots kept for
/// the depletion report. Products without any running record are not
/// stock-tracked and are always considered available.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub day: Option<NaiveDate>,
    pub initial_quantity: i32,
    pub current_quantity: i32,
    /// Optimistic-concurrency token; the ledger retries its read-modify-write
    /// when a concurrent decrement bumped it first.
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn sold(&self) -> i32 {
        self.initial_quantity - self.current_quantity
    }

    /// Fraction of the initial stock already sold, in [0, 1].
    pub fn depletion_ratio(&self) -> f64 {
        if self.initial_quantity <= 0 {
            return 0.0;
        }
        f64::from(self.sold()) / f64::from(self.initial_quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(initial: i32, current: i32) -> Model {
        Model {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            day: None,
            initial_quantity: initial,
            current_quantity: current,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn sold_is_initial_minus_current() {
        assert_eq!(record(10, 3).sold(), 7);
        assert_eq!(record(5, 5).sold(), 0);
    }

    #[test]
    fn depletion_ratio_handles_zero_initial() {
        assert_eq!(record(0, 0).depletion_ratio(), 0.0);
        assert!((record(8, 2).depletion_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
