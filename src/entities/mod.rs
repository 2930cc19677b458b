pub mod customer;
pub mod inventory_record;
pub mod order;
pub mod order_item;
pub mod schedule_rule;
pub mod store_override;

// Re-export entities
pub use customer::{Entity as Customer, Model as CustomerModel};
pub use inventory_record::{Entity as InventoryRecord, Model as InventoryRecordModel};
pub use order::{Entity as Order, Model as OrderModel, OrderKind, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use schedule_rule::{Entity as ScheduleRule, Model as ScheduleRuleModel};
pub use store_override::{Entity as StoreOverride, Model as StoreOverrideModel};
