use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::entities::order_item;
use crate::services::order_status::legal_transitions;
use crate::services::orders::{
    model_to_response, IngestOrderRequest, OrderListResponse, OrderResponse,
};
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState, ListQuery};

/// Cart collaborator entry point: validates, persists, decrements stock.
/// A partial failure surfaces as 207 with the failed stage named; the order
/// itself is durable either way.
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<IngestOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state.services.orders.ingest(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<OrderListResponse> {
    let list = state
        .services
        .orders
        .list_orders(query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(list)))
}

/// Kitchen board dataset; doubles as the re-fetch target for degraded
/// realtime subscriptions.
pub async fn list_today(State(state): State<AppState>) -> ApiResult<Vec<OrderResponse>> {
    let orders = state.services.orders.list_today().await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .get_order_by_number(&order_number)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn get_order_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<order_item::Model>> {
    let items = state.services.orders.get_order_items(id).await?;
    Ok(Json(ApiResponse::success(items)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
    /// Operator display name for the audit trail; the platform's auth layer
    /// already vetted the caller.
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub order: OrderResponse,
    /// Legal next statuses; the UI disables everything else.
    pub legal_transitions: Vec<OrderStatus>,
}

/// Operator action surface. Button press and drag-and-drop reclassification
/// both land here, funneling into the single validation path.
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> ApiResult<TransitionResponse> {
    let target: OrderStatus = payload
        .status
        .parse()
        .map_err(ServiceError::ValidationError)?;
    let actor = payload.actor.as_deref().unwrap_or("operator");

    let order = state
        .services
        .order_status
        .apply_transition(id, target, actor)
        .await?;

    let legal = legal_transitions(order.kind, order.status).to_vec();
    Ok(Json(ApiResponse::success(TransitionResponse {
        order: model_to_response(order),
        legal_transitions: legal,
    })))
}

/// Legal next statuses for an order, so the UI can render only valid moves.
pub async fn get_order_transitions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<OrderStatus>> {
    let legal = state.services.order_status.legal_targets(id).await?;
    Ok(Json(ApiResponse::success(legal)))
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelOrderRequest>>,
) -> ApiResult<OrderResponse> {
    let actor = payload
        .as_ref()
        .and_then(|p| p.actor.as_deref())
        .unwrap_or("operator");
    let order = state.services.order_status.cancel(id, actor).await?;
    Ok(Json(ApiResponse::success(model_to_response(order))))
}

pub async fn archive_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.archive_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}
