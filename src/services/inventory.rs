use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::inventory_record::{self, Entity as InventoryRecordEntity, Model as InventoryRecordModel},
    entities::order_item,
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Bounded retries for the versioned read-modify-write. Conflicts only arise
/// when two orders race on the same product, so contention is short-lived.
const MAX_DECREMENT_RETRIES: u32 = 3;

/// Stock floor arithmetic: available quantity never goes negative. Oversold
/// orders are still accepted; the floor is a reporting signal, not a limit.
pub fn clamped_decrement(current: i32, quantity: i32) -> i32 {
    (current - quantity).max(0)
}

/// One row of the per-day depletion report.
#[derive(Debug, Serialize)]
pub struct DepletionEntry {
    pub product_id: Uuid,
    pub initial_quantity: i32,
    pub current_quantity: i32,
    pub sold: i32,
    pub depletion_ratio: f64,
}

/// Ledger of per-product available quantity. Mutated only on confirmed
/// sales and by operator stock resets, never by the storefront directly.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Reduce the available quantity of one product by `quantity`, floored at
    /// zero, and mirror the arithmetic into the per-day snapshot for `day`.
    ///
    /// Products without a running record are not stock-tracked: no-op. The
    /// write is a versioned read-modify-write retried on conflict; there is
    /// no built-in idempotency, callers de-duplicate by order id.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity))]
    pub async fn decrement(
        &self,
        product_id: Uuid,
        quantity: i32,
        day: NaiveDate,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Decrement quantity must be positive, got {quantity}"
            )));
        }

        for attempt in 0..MAX_DECREMENT_RETRIES {
            let Some(record) = self.running_record(product_id).await? else {
                debug!(product_id = %product_id, "product not stock-tracked, decrement skipped");
                return Ok(());
            };

            let new_current = clamped_decrement(record.current_quantity, quantity);
            if self.try_write_quantity(&record, new_current).await? {
                info!(
                    product_id = %product_id,
                    old_quantity = record.current_quantity,
                    new_quantity = new_current,
                    "inventory decremented"
                );
                if let Err(e) = self
                    .event_sender
                    .send(Event::InventoryAdjusted {
                        product_id,
                        old_quantity: record.current_quantity,
                        new_quantity: new_current,
                    })
                    .await
                {
                    warn!(error = %e, product_id = %product_id, "Failed to send inventory adjusted event");
                }
                self.apply_day_snapshot(product_id, day, quantity, &record)
                    .await?;
                return Ok(());
            }

            debug!(product_id = %product_id, attempt, "inventory version conflict, retrying");
        }

        Err(ServiceError::ConcurrentModification(product_id))
    }

    /// Decrement stock for every line item of a freshly ingested order.
    /// Callers de-duplicate by order id; this method is not retried as a
    /// whole after a partial failure is reported.
    #[instrument(skip(self, items), fields(order_id = %order_id, item_count = items.len()))]
    pub async fn decrement_for_order(
        &self,
        order_id: Uuid,
        items: &[order_item::Model],
        day: NaiveDate,
    ) -> Result<(), ServiceError> {
        for item in items {
            self.decrement(item.product_id, item.quantity, day).await?;
        }
        Ok(())
    }

    /// Operator stock reset: makes the product stock-tracked (creating the
    /// running record if needed) with a fresh initial = current = `quantity`.
    #[instrument(skip(self), fields(product_id = %product_id, quantity = quantity))]
    pub async fn set_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<InventoryRecordModel, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Stock quantity must not be negative, got {quantity}"
            )));
        }

        let now = Utc::now();
        let model = match self.running_record(product_id).await? {
            Some(record) => {
                let old = record.current_quantity;
                let mut active: inventory_record::ActiveModel = record.into();
                active.initial_quantity = Set(quantity);
                active.current_quantity = Set(quantity);
                active.version = Set(active.version.unwrap() + 1);
                active.updated_at = Set(now);
                let updated = active.update(&*self.db).await?;
                if let Err(e) = self
                    .event_sender
                    .send(Event::InventoryAdjusted {
                        product_id,
                        old_quantity: old,
                        new_quantity: quantity,
                    })
                    .await
                {
                    warn!(error = %e, "Failed to send inventory adjusted event");
                }
                updated
            }
            None => {
                let active = inventory_record::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(product_id),
                    day: Set(None),
                    initial_quantity: Set(quantity),
                    current_quantity: Set(quantity),
                    version: Set(1),
                    updated_at: Set(now),
                };
                active.insert(&*self.db).await?
            }
        };

        Ok(model)
    }

    /// Available quantity of a product; `None` when not stock-tracked.
    #[instrument(skip(self))]
    pub async fn get_available(&self, product_id: Uuid) -> Result<Option<i32>, ServiceError> {
        Ok(self
            .running_record(product_id)
            .await?
            .map(|r| r.current_quantity))
    }

    /// All running records, for the ops dashboard stock page.
    #[instrument(skip(self))]
    pub async fn list_stock(&self) -> Result<Vec<InventoryRecordModel>, ServiceError> {
        let records = InventoryRecordEntity::find()
            .filter(inventory_record::Column::Day.is_null())
            .all(&*self.db)
            .await?;
        Ok(records)
    }

    /// Per-day sold/depletion figures derived from the day snapshots.
    #[instrument(skip(self))]
    pub async fn depletion_report(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<DepletionEntry>, ServiceError> {
        let snapshots = InventoryRecordEntity::find()
            .filter(inventory_record::Column::Day.eq(day))
            .all(&*self.db)
            .await?;

        Ok(snapshots
            .into_iter()
            .map(|s| DepletionEntry {
                product_id: s.product_id,
                initial_quantity: s.initial_quantity,
                current_quantity: s.current_quantity,
                sold: s.sold(),
                depletion_ratio: s.depletion_ratio(),
            })
            .collect())
    }

    async fn running_record(
        &self,
        product_id: Uuid,
    ) -> Result<Option<InventoryRecordModel>, ServiceError> {
        let record = InventoryRecordEntity::find()
            .filter(inventory_record::Column::ProductId.eq(product_id))
            .filter(inventory_record::Column::Day.is_null())
            .one(&*self.db)
            .await?;
        Ok(record)
    }

    /// Conditional write: succeeds only if nobody bumped the version since we
    /// read `record`. Returns false on conflict so the caller re-reads.
    async fn try_write_quantity(
        &self,
        record: &InventoryRecordModel,
        new_current: i32,
    ) -> Result<bool, ServiceError> {
        let result = InventoryRecordEntity::update_many()
            .col_expr(inventory_record::Column::CurrentQuantity, Expr::value(new_current))
            .col_expr(inventory_record::Column::Version, Expr::value(record.version + 1))
            .col_expr(inventory_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(inventory_record::Column::Id.eq(record.id))
            .filter(inventory_record::Column::Version.eq(record.version))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Mirror a decrement into the day snapshot, creating the row on the
    /// first sale of the day seeded from the running record's pre-sale state.
    async fn apply_day_snapshot(
        &self,
        product_id: Uuid,
        day: NaiveDate,
        quantity: i32,
        running: &InventoryRecordModel,
    ) -> Result<(), ServiceError> {
        for attempt in 0..MAX_DECREMENT_RETRIES {
            let snapshot = InventoryRecordEntity::find()
                .filter(inventory_record::Column::ProductId.eq(product_id))
                .filter(inventory_record::Column::Day.eq(day))
                .one(&*self.db)
                .await?;

            match snapshot {
                Some(row) => {
                    let new_current = clamped_decrement(row.current_quantity, quantity);
                    if self.try_write_quantity(&row, new_current).await? {
                        return Ok(());
                    }
                    debug!(product_id = %product_id, attempt, "day snapshot version conflict, retrying");
                }
                None => {
                    let active = inventory_record::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        product_id: Set(product_id),
                        day: Set(Some(day)),
                        initial_quantity: Set(running.initial_quantity),
                        current_quantity: Set(clamped_decrement(
                            running.current_quantity,
                            quantity,
                        )),
                        version: Set(1),
                        updated_at: Set(Utc::now()),
                    };
                    active.insert(&*self.db).await?;
                    return Ok(());
                }
            }
        }

        Err(ServiceError::ConcurrentModification(product_id))
    }
}
