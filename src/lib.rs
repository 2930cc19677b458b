//! Comanda API Library
//!
//! Order lifecycle, inventory ledger and store-hours core of a food-ordering
//! platform. The storefront, kitchen board and customer tracking views are
//! external collaborators talking to the HTTP surface and the realtime
//! bridge.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;
pub mod sync;

use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub sync: Arc<sync::SyncBridge>,
    pub services: handlers::AppServices,
}

// Common query parameters for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

// Enhanced API routes function
pub fn api_v1_routes(gate: auth::OperatorGate) -> Router<AppState> {
    // Customer-facing surface: storefront gate, ingestion, tracking view
    let storefront = Router::new()
        .route(
            "/storefront/status",
            get(handlers::schedule::storefront_status),
        )
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/by-number/:order_number",
            get(handlers::orders::get_order_by_number),
        )
        .route("/orders/:id/items", get(handlers::orders::get_order_items));

    // Operator surface: kitchen board, status moves, hours, stock
    let operator = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/today", get(handlers::orders::list_today))
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .route(
            "/orders/:id/transitions",
            get(handlers::orders::get_order_transitions),
        )
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route("/orders/:id/archive", post(handlers::orders::archive_order))
        .route(
            "/schedule",
            get(handlers::schedule::get_schedule).put(handlers::schedule::put_schedule),
        )
        .route(
            "/schedule/override",
            get(handlers::schedule::get_override).put(handlers::schedule::put_override),
        )
        .route("/inventory", get(handlers::inventory::list_stock))
        .route(
            "/inventory/depletion",
            get(handlers::inventory::depletion_report),
        )
        .route(
            "/inventory/:product_id",
            get(handlers::inventory::get_stock).put(handlers::inventory::set_stock),
        )
        .route_layer(middleware::from_fn_with_state(
            gate,
            auth::require_operator,
        ));

    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(storefront)
        .merge(operator)
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let version = env!("CARGO_PKG_VERSION");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "service": "comanda-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    // Check database connectivity
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "subscriptions": state.sync.subscriber_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
