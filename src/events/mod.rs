use std::sync::Arc;

use chrono_tz::Tz;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    entities::order::{Entity as OrderEntity, OrderStatus},
    services::dispatch::{DispatchPayload, DispatchService},
    sync::{ChangeEvent, SyncBridge},
};

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    /// Side-effect intent: notify the external dispatch collaborator.
    DispatchRequested(Uuid),

    // Inventory events
    InventoryAdjusted {
        product_id: Uuid,
        old_quantity: i32,
        new_quantity: i32,
    },

    // Store configuration events
    ScheduleChanged,
    OverrideChanged,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel: fans committed mutations out to the realtime
/// bridge and fires the dispatch webhook where an event calls for it.
/// Webhook failures are logged and swallowed here; the owning write has
/// already committed.
pub async fn process_events(
    mut rx: mpsc::Receiver<Event>,
    db: Arc<DatabaseConnection>,
    bridge: Arc<SyncBridge>,
    dispatch: Arc<DispatchService>,
    tz: Tz,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated(order_id) => {
                publish_order_change(&db, &bridge, tz, order_id).await;
                notify_dispatch(&db, &dispatch, order_id).await;
            }
            Event::OrderStatusChanged { order_id, .. } => {
                publish_order_change(&db, &bridge, tz, order_id).await;
            }
            Event::DispatchRequested(order_id) => {
                notify_dispatch(&db, &dispatch, order_id).await;
            }
            Event::InventoryAdjusted { product_id, .. } => {
                bridge.publish(ChangeEvent::Inventory { product_id });
            }
            Event::ScheduleChanged | Event::OverrideChanged => {
                bridge.publish(ChangeEvent::StoreConfig);
            }
        }
    }

    info!("Event processing loop stopped");
}

/// Re-reads the order so subscribers always receive store-confirmed state,
/// never an optimistic local value.
async fn publish_order_change(
    db: &DatabaseConnection,
    bridge: &SyncBridge,
    tz: Tz,
    order_id: Uuid,
) {
    match OrderEntity::find_by_id(order_id).one(db).await {
        Ok(Some(order)) => bridge.publish(ChangeEvent::Order {
            order_id,
            status: order.status,
            placed_on: order.placed_at.with_timezone(&tz).date_naive(),
        }),
        Ok(None) => warn!(order_id = %order_id, "order vanished before change propagation"),
        Err(e) => error!(error = %e, order_id = %order_id, "failed to load order for change propagation"),
    }
}

async fn notify_dispatch(db: &DatabaseConnection, dispatch: &DispatchService, order_id: Uuid) {
    if !dispatch.enabled() {
        return;
    }
    match DispatchPayload::load(db, order_id).await {
        Ok(payload) => dispatch.notify(payload).await,
        Err(e) => warn!(error = %e, order_id = %order_id, "failed to assemble dispatch payload"),
    }
}
