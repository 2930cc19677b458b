use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderKind, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    errors::{IngestStage, ServiceError},
    events::{Event, EventSender},
    services::customers::{CustomerHint, CustomerService},
    services::inventory::InventoryService,
};

/// One cart entry as the storefront submits it. `unit_price` is the price at
/// add-to-cart time and becomes the captured line item price.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CartItemInput {
    pub product_id: Uuid,
    #[serde(default)]
    pub variation_id: Option<Uuid>,
    #[validate(length(min = 1, message = "Item name is required"))]
    pub name: String,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub customization: Option<String>,
    #[serde(default)]
    pub is_upsell: bool,
}

/// Request/Response types for the order service
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngestOrderRequest {
    /// Client-generated token; replays short-circuit to the original order.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    pub kind: OrderKind,
    #[validate(length(min = 1, message = "Cart must contain at least one item"))]
    pub items: Vec<CartItemInput>,
    #[serde(default)]
    pub delivery_fee: Option<Decimal>,
    #[serde(default)]
    pub delivery_address: Option<serde_json::Value>,
    #[serde(default)]
    pub table_label: Option<String>,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub payment_method: String,
    #[serde(default)]
    pub change_due: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Option<Uuid>,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub upsell_total: Decimal,
    pub total: Decimal,
    pub payment_method: String,
    pub change_due: Option<Decimal>,
    pub notes: Option<String>,
    pub contact_phone: Option<String>,
    pub delivery_address: Option<String>,
    pub table_label: Option<String>,
    pub placed_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Authoritative money figures, recomputed server-side from the cart's line
/// items. Client-supplied totals are never trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub upsell_total: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
}

pub fn compute_totals(items: &[CartItemInput], delivery_fee: Decimal) -> OrderTotals {
    let mut subtotal = Decimal::ZERO;
    let mut upsell_total = Decimal::ZERO;
    for item in items {
        let line = item.unit_price * Decimal::from(item.quantity);
        subtotal += line;
        if item.is_upsell {
            upsell_total += line;
        }
    }
    OrderTotals {
        subtotal,
        upsell_total,
        delivery_fee,
        total: subtotal + delivery_fee,
    }
}

/// Shape validation; rejects before any write so the caller can correct the
/// cart and resubmit.
fn validate_request(request: &IngestOrderRequest) -> Result<(), ServiceError> {
    request
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    for item in &request.items {
        item.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if item.unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Unit price of '{}' must not be negative",
                item.name
            )));
        }
    }

    match request.kind {
        OrderKind::Delivery => {
            if request.delivery_address.is_none() {
                return Err(ServiceError::ValidationError(
                    "Delivery orders require a delivery address".to_string(),
                ));
            }
            if request
                .contact_phone
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .is_none()
            {
                return Err(ServiceError::ValidationError(
                    "Delivery orders require a contact phone".to_string(),
                ));
            }
        }
        OrderKind::DineIn => {
            if request
                .table_label
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .is_none()
            {
                return Err(ServiceError::ValidationError(
                    "Dine-in orders require a table label".to_string(),
                ));
            }
        }
        OrderKind::Pickup => {}
    }

    if let Some(fee) = request.delivery_fee {
        if fee < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Delivery fee must not be negative".to_string(),
            ));
        }
    }

    Ok(())
}

/// Turns a validated cart into a durable order: resolves the customer,
/// persists the header and line items, and decrements stock.
///
/// Steps run strictly in sequence. A header failure aborts cleanly; a later
/// failure is reported as `PartialIngestFailure` while the order stays in
/// the store, payable as-is. Once started, ingestion runs to completion
/// whether or not the submitting client is still around.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    customers: CustomerService,
    inventory: InventoryService,
    tz: Tz,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        customers: CustomerService,
        inventory: InventoryService,
        tz: Tz,
    ) -> Self {
        Self {
            db,
            event_sender,
            customers,
            inventory,
            tz,
        }
    }

    /// Calendar day of `now` in the store time zone; keys the inventory day
    /// snapshots and the kitchen board's "today" filter.
    pub fn business_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    #[instrument(skip(self, request), fields(kind = %request.kind, item_count = request.items.len()))]
    pub async fn ingest(
        &self,
        request: IngestOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        // Replayed submission: hand back the original order, write nothing.
        if let Some(key) = request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        {
            if let Some(existing) = OrderEntity::find()
                .filter(order::Column::IdempotencyKey.eq(key))
                .one(&*self.db)
                .await?
            {
                info!(order_id = %existing.id, "idempotency key replay, returning existing order");
                return Ok(model_to_response(existing));
            }
        }

        validate_request(&request)?;
        let totals = compute_totals(
            &request.items,
            request.delivery_fee.unwrap_or(Decimal::ZERO),
        );

        // Customer resolution happens before the header exists; a failure
        // here aborts with nothing order-shaped persisted.
        let address_snapshot = request
            .delivery_address
            .as_ref()
            .map(|a| a.to_string());
        let customer = self
            .customers
            .resolve_or_create(&CustomerHint {
                customer_id: request.customer_id,
                name: request.customer_name.clone(),
                phone: request.contact_phone.clone(),
                address: address_snapshot.clone(),
            })
            .await?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = format!("ORD-{}", order_id.to_string()[..8].to_uppercase());

        let header = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(customer.as_ref().map(|c| c.id)),
            kind: Set(request.kind),
            status: Set(OrderStatus::Received),
            subtotal: Set(totals.subtotal),
            delivery_fee: Set(totals.delivery_fee),
            upsell_total: Set(totals.upsell_total),
            total: Set(totals.total),
            payment_method: Set(request.payment_method.clone()),
            change_due: Set(request.change_due),
            notes: Set(request.notes.clone()),
            contact_phone: Set(request.contact_phone.clone()),
            delivery_address: Set(address_snapshot),
            table_label: Set(request.table_label.clone()),
            idempotency_key: Set(request
                .idempotency_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)),
            placed_at: Set(now),
            confirmed_at: Set(None),
            delivered_at: Set(None),
            is_archived: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        // Header failure: abort and report, nothing else has happened.
        let order_model = header.insert(&*self.db).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to persist order header");
            ServiceError::DatabaseError(e)
        })?;

        // From here on the order is durable; later failures are reported but
        // never rolled back. The caller retries the failed step only.
        let mut failure: Option<(IngestStage, String)> = None;

        let mut item_models: Vec<OrderItemModel> = Vec::with_capacity(request.items.len());
        for entry in &request.items {
            let active = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(entry.product_id),
                variation_id: Set(entry.variation_id),
                name: Set(entry.name.clone()),
                quantity: Set(entry.quantity),
                unit_price: Set(entry.unit_price),
                total_price: Set(entry.unit_price * Decimal::from(entry.quantity)),
                customization: Set(entry.customization.clone()),
                is_upsell: Set(entry.is_upsell),
                ..Default::default()
            };
            match active.insert(&*self.db).await {
                Ok(model) => item_models.push(model),
                Err(e) => {
                    error!(error = %e, order_id = %order_id, "Failed to persist line item");
                    failure = Some((IngestStage::LineItems, e.to_string()));
                    break;
                }
            }
        }

        if failure.is_none() {
            if let Err(e) = self
                .inventory
                .decrement_for_order(order_id, &item_models, self.business_day(now))
                .await
            {
                error!(error = %e, order_id = %order_id, "Inventory decrement failed after order creation");
                failure = Some((IngestStage::Inventory, e.to_string()));
            }
        }

        // The order exists either way; observers must hear about it.
        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order created event");
        }

        match failure {
            Some((stage, detail)) => Err(ServiceError::PartialIngestFailure {
                order_id,
                stage,
                detail,
            }),
            None => {
                info!(order_id = %order_id, order_number = %order_number, "order ingested");
                Ok(model_to_response(order_model))
            }
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id).one(&*self.db).await?;
        Ok(order.map(model_to_response))
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<Option<OrderResponse>, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?;
        Ok(order.map(model_to_response))
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Lists orders with pagination, newest first, archived excluded.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::IsArchived.eq(false))
            .order_by_desc(order::Column::PlacedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderListResponse {
            orders: orders.into_iter().map(model_to_response).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Kitchen board dataset: every order placed today in the store time
    /// zone, oldest first. Also the re-fetch target when a subscription
    /// degrades to polling.
    #[instrument(skip(self))]
    pub async fn list_today(&self) -> Result<Vec<OrderResponse>, ServiceError> {
        let (start, end) = self.business_day_bounds(Utc::now());
        let orders = OrderEntity::find()
            .filter(order::Column::PlacedAt.gte(start))
            .filter(order::Column::PlacedAt.lt(end))
            .filter(order::Column::IsArchived.eq(false))
            .order_by_asc(order::Column::PlacedAt)
            .all(&*self.db)
            .await?;
        Ok(orders.into_iter().map(model_to_response).collect())
    }

    /// Administrative escape hatch; the core never deletes orders.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn archive_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut active: order::ActiveModel = order.into();
        active.is_archived = Set(true);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(active.version.unwrap() + 1);
        let archived = active.update(&*self.db).await?;

        info!(order_id = %order_id, "order archived");
        Ok(model_to_response(archived))
    }

    /// UTC instants bounding today's business day in the store zone.
    fn business_day_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let day = self.business_day(now);
        let midnight = |d: NaiveDate| {
            self.tz
                .from_local_datetime(&d.and_hms_opt(0, 0, 0).unwrap())
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now)
        };
        (midnight(day), midnight(day + chrono::Duration::days(1)))
    }
}

/// Converts an order model to response format
pub fn model_to_response(model: OrderModel) -> OrderResponse {
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        customer_id: model.customer_id,
        kind: model.kind,
        status: model.status,
        subtotal: model.subtotal,
        delivery_fee: model.delivery_fee,
        upsell_total: model.upsell_total,
        total: model.total,
        payment_method: model.payment_method,
        change_due: model.change_due,
        notes: model.notes,
        contact_phone: model.contact_phone,
        delivery_address: model.delivery_address,
        table_label: model.table_label,
        placed_at: model.placed_at,
        confirmed_at: model.confirmed_at,
        delivered_at: model.delivered_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
        version: model.version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(name: &str, quantity: i32, unit_price: Decimal, is_upsell: bool) -> CartItemInput {
        CartItemInput {
            product_id: Uuid::new_v4(),
            variation_id: None,
            name: name.to_string(),
            quantity,
            unit_price,
            customization: None,
            is_upsell,
        }
    }

    fn delivery_request(items: Vec<CartItemInput>) -> IngestOrderRequest {
        IngestOrderRequest {
            idempotency_key: None,
            customer_id: None,
            customer_name: Some("Ana".into()),
            contact_phone: Some("+5511988887777".into()),
            kind: OrderKind::Delivery,
            items,
            delivery_fee: Some(dec!(8.00)),
            delivery_address: Some(serde_json::json!({"street": "Rua A", "number": "12"})),
            table_label: None,
            payment_method: "cash".into(),
            change_due: Some(dec!(50.00)),
            notes: None,
        }
    }

    #[test]
    fn totals_are_recomputed_from_line_items() {
        let items = vec![
            item("Marmita P", 2, dec!(18.50), false),
            item("Refrigerante", 1, dec!(6.00), true),
        ];
        let totals = compute_totals(&items, dec!(8.00));
        assert_eq!(totals.subtotal, dec!(43.00));
        assert_eq!(totals.upsell_total, dec!(6.00));
        assert_eq!(totals.total, dec!(51.00));
    }

    #[test]
    fn totals_with_empty_fee() {
        let totals = compute_totals(&[item("Combo", 1, dec!(25.00), false)], Decimal::ZERO);
        assert_eq!(totals.total, totals.subtotal);
    }

    #[test]
    fn empty_cart_is_rejected() {
        let request = delivery_request(vec![]);
        assert!(matches!(
            validate_request(&request),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let request = delivery_request(vec![item("Marmita", 0, dec!(18.50), false)]);
        assert!(matches!(
            validate_request(&request),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn delivery_without_address_is_rejected() {
        let mut request = delivery_request(vec![item("Marmita", 1, dec!(18.50), false)]);
        request.delivery_address = None;
        let err = validate_request(&request).unwrap_err();
        assert!(err.to_string().contains("delivery address"));
    }

    #[test]
    fn delivery_without_phone_is_rejected() {
        let mut request = delivery_request(vec![item("Marmita", 1, dec!(18.50), false)]);
        request.contact_phone = Some("  ".into());
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn dine_in_requires_a_table() {
        let mut request = delivery_request(vec![item("Prato feito", 1, dec!(22.00), false)]);
        request.kind = OrderKind::DineIn;
        request.delivery_address = None;
        request.contact_phone = None;
        assert!(validate_request(&request).is_err());

        request.table_label = Some("Mesa 4".into());
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn pickup_needs_neither_address_nor_table() {
        let mut request = delivery_request(vec![item("Marmita", 1, dec!(18.50), false)]);
        request.kind = OrderKind::Pickup;
        request.delivery_address = None;
        request.contact_phone = None;
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn negative_price_is_rejected() {
        let request = delivery_request(vec![item("Marmita", 1, dec!(-1.00), false)]);
        assert!(validate_request(&request).is_err());
    }
}
