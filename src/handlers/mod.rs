pub mod inventory;
pub mod orders;
pub mod schedule;

use std::sync::Arc;

use chrono_tz::Tz;

use crate::db::DbPool;
use crate::events::EventSender;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<crate::services::orders::OrderService>,
    pub order_status: Arc<crate::services::order_status::OrderStatusService>,
    pub inventory: Arc<crate::services::inventory::InventoryService>,
    pub schedule: Arc<crate::services::schedule::ScheduleService>,
    pub customers: Arc<crate::services::customers::CustomerService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, tz: Tz) -> Self {
        let customers = crate::services::customers::CustomerService::new(db_pool.clone());
        let inventory = crate::services::inventory::InventoryService::new(
            db_pool.clone(),
            event_sender.clone(),
        );
        let orders = crate::services::orders::OrderService::new(
            db_pool.clone(),
            event_sender.clone(),
            customers.clone(),
            inventory.clone(),
            tz,
        );
        let order_status = crate::services::order_status::OrderStatusService::new(
            db_pool.clone(),
            event_sender.clone(),
        );
        let schedule =
            crate::services::schedule::ScheduleService::new(db_pool, event_sender, tz);

        Self {
            orders: Arc::new(orders),
            order_status: Arc::new(order_status),
            inventory: Arc::new(inventory),
            schedule: Arc::new(schedule),
            customers: Arc::new(customers),
        }
    }
}
