use std::time::Duration;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::customer::Entity as CustomerEntity,
    entities::order::{Entity as OrderEntity, OrderKind, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
};

/// Flattened line item as the dispatch collaborator wants it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchItem {
    pub quantity: i32,
    pub name: String,
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
}

/// Payload POSTed to the external dispatch endpoint on order creation and on
/// entering `out_for_delivery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub kind: OrderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<serde_json::Value>,
    pub total: Decimal,
    pub items: Vec<DispatchItem>,
}

impl DispatchPayload {
    /// Assemble the payload from the persisted order, its line items and the
    /// resolved customer.
    pub async fn load(
        db: &DatabaseConnection,
        order_id: Uuid,
    ) -> Result<Self, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await?;

        let customer = match order.customer_id {
            Some(customer_id) => CustomerEntity::find_by_id(customer_id)
                .one(db)
                .await?
                .map(|c| CustomerSnapshot {
                    id: c.id,
                    name: c.name,
                    phone: c.phone,
                }),
            None => None,
        };

        let address = order
            .delivery_address
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());

        Ok(Self {
            order_id: order.id,
            order_number: order.order_number,
            status: order.status,
            kind: order.kind,
            contact_phone: order.contact_phone,
            customer,
            address,
            total: order.total,
            items: items
                .into_iter()
                .map(|item| DispatchItem {
                    quantity: item.quantity,
                    name: item.name,
                    price: item.unit_price,
                    notes: item.customization,
                })
                .collect(),
        })
    }
}

/// Best-effort notifier for the external dispatch collaborator.
///
/// The order's own state is the source of truth: a non-2xx answer or a
/// network failure is logged and swallowed, never propagated to the owning
/// transition.
#[derive(Clone)]
pub struct DispatchService {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl DispatchService {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("http client construction"),
            webhook_url,
        }
    }

    pub fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Fire-and-forget delivery. Absent configuration disables the notifier.
    #[instrument(skip(self, payload), fields(order_id = %payload.order_id, status = %payload.status))]
    pub async fn notify(&self, payload: DispatchPayload) {
        let Some(url) = self.webhook_url.as_deref() else {
            debug!("dispatch webhook not configured, notification skipped");
            return;
        };

        match self.send(url, &payload).await {
            Ok(()) => info!(order_number = %payload.order_number, "dispatch notified"),
            Err(e) => warn!(error = %e, order_number = %payload.order_number, "dispatch notification failed, ignoring"),
        }
    }

    /// One delivery attempt against an explicit URL. Used directly by tests;
    /// production paths go through `notify`.
    pub async fn send(&self, url: &str, payload: &DispatchPayload) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "dispatch endpoint answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}
