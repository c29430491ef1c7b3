use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::inventory_transaction::kind;
use crate::services::inventory::{
    InventoryListResponse, InventoryTransactionResponse, KindBatchRequest, MovementReportResponse,
    OnHandResponse,
};
use crate::{auth::AuthUser, ApiResponse, ApiResult, AppState, ListQuery};

/// POST /inventory/inputs — stock receipts
pub async fn record_inputs(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<KindBatchRequest>,
) -> ApiResult<Vec<InventoryTransactionResponse>> {
    let recorded = state
        .services
        .inventory
        .record_kind_batch(kind::IN, request, &user)
        .await?;
    Ok(Json(ApiResponse::success(recorded)))
}

/// POST /inventory/issues — stock consumed or withdrawn
pub async fn record_issues(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<KindBatchRequest>,
) -> ApiResult<Vec<InventoryTransactionResponse>> {
    let recorded = state
        .services
        .inventory
        .record_kind_batch(kind::OUT, request, &user)
        .await?;
    Ok(Json(ApiResponse::success(recorded)))
}

/// POST /inventory/adjustments — signed corrections
pub async fn record_adjustments(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<KindBatchRequest>,
) -> ApiResult<Vec<InventoryTransactionResponse>> {
    let recorded = state
        .services
        .inventory
        .record_kind_batch(kind::ADJUST, request, &user)
        .await?;
    Ok(Json(ApiResponse::success(recorded)))
}

#[derive(Debug, Deserialize)]
pub struct InventoryListParams {
    pub branch_id: Uuid,
    pub ingredient_id: Option<Uuid>,
}

/// GET /inventory/transactions?branch_id=...
pub async fn list_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<InventoryListParams>,
    Query(list): Query<ListQuery>,
) -> ApiResult<InventoryListResponse> {
    let response = state
        .services
        .inventory
        .list_transactions(
            params.branch_id,
            params.ingredient_id,
            list.page,
            list.limit,
            &user,
        )
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    pub branch_id: Uuid,
}

/// GET /reports/inventory?branch_id=...
pub async fn movement_report(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ReportParams>,
) -> ApiResult<MovementReportResponse> {
    let report = state
        .services
        .inventory
        .movement_report(params.branch_id, &user)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}

#[derive(Debug, Deserialize)]
pub struct OnHandParams {
    pub branch_id: Uuid,
}

/// GET /inventory/on-hand/:ingredient_id?branch_id=...
pub async fn get_on_hand(
    State(state): State<AppState>,
    user: AuthUser,
    Path(ingredient_id): Path<Uuid>,
    Query(params): Query<OnHandParams>,
) -> ApiResult<OnHandResponse> {
    let response = state
        .services
        .inventory
        .on_hand(params.branch_id, ingredient_id, &user)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}
