use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::InventoryRecordModel;
use crate::services::inventory::DepletionEntry;
use crate::{ApiResponse, ApiResult, AppState};

pub async fn list_stock(State(state): State<AppState>) -> ApiResult<Vec<InventoryRecordModel>> {
    let records = state.services.inventory.list_stock().await?;
    Ok(Json(ApiResponse::success(records)))
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub product_id: Uuid,
    /// `None` means the product is not stock-tracked and always available.
    pub available: Option<i32>,
}

pub async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<AvailabilityResponse> {
    let available = state.services.inventory.get_available(product_id).await?;
    Ok(Json(ApiResponse::success(AvailabilityResponse {
        product_id,
        available,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub quantity: i32,
}

/// Operator stock reset; opts the product into tracking if it was not.
pub async fn set_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<SetStockRequest>,
) -> ApiResult<InventoryRecordModel> {
    let record = state
        .services
        .inventory
        .set_stock(product_id, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

#[derive(Debug, Deserialize)]
pub struct DepletionQuery {
    /// Defaults to today's business day in the store time zone.
    #[serde(default)]
    pub day: Option<NaiveDate>,
}

pub async fn depletion_report(
    State(state): State<AppState>,
    Query(query): Query<DepletionQuery>,
) -> ApiResult<Vec<DepletionEntry>> {
    let day = query
        .day
        .unwrap_or_else(|| state.services.orders.business_day(chrono::Utc::now()));
    let report = state.services.inventory.depletion_report(day).await?;
    Ok(Json(ApiResponse::success(report)))
}
