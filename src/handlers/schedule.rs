use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::entities::{ScheduleRuleModel, StoreOverrideModel};
use crate::services::schedule::{OverrideUpdate, ScheduleRuleUpdate, StoreOpenStatus};
use crate::{ApiResponse, ApiResult, AppState};

/// Storefront gate: `{open, reason}`. The storefront renders a blocking
/// overlay when `open = false`, except on its own profile/hours page.
pub async fn storefront_status(State(state): State<AppState>) -> ApiResult<StoreOpenStatus> {
    let status = state.services.schedule.current_status().await?;
    Ok(Json(ApiResponse::success(status)))
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub rules: Vec<ScheduleRuleModel>,
    #[serde(rename = "override")]
    pub store_override: StoreOverrideModel,
}

pub async fn get_schedule(State(state): State<AppState>) -> ApiResult<ScheduleResponse> {
    let rules = state.services.schedule.list_rules().await?;
    let store_override = state.services.schedule.get_override().await?;
    Ok(Json(ApiResponse::success(ScheduleResponse {
        rules,
        store_override,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PutScheduleRequest {
    pub rules: Vec<ScheduleRuleUpdate>,
}

/// Operator hours editing; emits a store-config change so banners refresh.
pub async fn put_schedule(
    State(state): State<AppState>,
    Json(payload): Json<PutScheduleRequest>,
) -> ApiResult<Vec<ScheduleRuleModel>> {
    let rules = state.services.schedule.upsert_rules(payload.rules).await?;
    Ok(Json(ApiResponse::success(rules)))
}

pub async fn get_override(State(state): State<AppState>) -> ApiResult<StoreOverrideModel> {
    let store_override = state.services.schedule.get_override().await?;
    Ok(Json(ApiResponse::success(store_override)))
}

pub async fn put_override(
    State(state): State<AppState>,
    Json(payload): Json<OverrideUpdate>,
) -> ApiResult<StoreOverrideModel> {
    let store_override = state.services.schedule.set_override(payload).await?;
    Ok(Json(ApiResponse::success(store_override)))
}
