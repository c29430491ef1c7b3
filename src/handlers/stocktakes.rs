use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::stocktakes::{
    CreateStocktakeRequest, StocktakeItemResponse, StocktakeListResponse, StocktakeResponse,
};
use crate::{auth::AuthUser, ApiResponse, ApiResult, AppState, ListQuery};

/// POST /stocktakes
pub async fn create_stocktake(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateStocktakeRequest>,
) -> ApiResult<StocktakeResponse> {
    let stocktake = state
        .services
        .stocktakes
        .create_stocktake(request, &user)
        .await?;
    Ok(Json(ApiResponse::success(stocktake)))
}

/// POST /stocktakes/:id/approve
pub async fn approve_stocktake(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StocktakeResponse> {
    let stocktake = state
        .services
        .stocktakes
        .approve_stocktake(id, &user)
        .await?;
    Ok(Json(ApiResponse::success(stocktake)))
}

/// GET /stocktakes/:id
pub async fn get_stocktake(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StocktakeResponse> {
    let stocktake = state
        .services
        .stocktakes
        .get_stocktake(id, &user)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Stocktake with ID {} not found", id)))?;
    Ok(Json(ApiResponse::success(stocktake)))
}

/// GET /stocktakes/:id/items
pub async fn list_stocktake_items(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<StocktakeItemResponse>> {
    let items = state.services.stocktakes.stocktake_items(id, &user).await?;
    Ok(Json(ApiResponse::success(items)))
}

#[derive(Debug, Deserialize)]
pub struct StocktakeListParams {
    pub branch_id: Uuid,
}

/// GET /stocktakes?branch_id=...
pub async fn list_stocktakes(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<StocktakeListParams>,
    Query(list): Query<ListQuery>,
) -> ApiResult<StocktakeListResponse> {
    let response = state
        .services
        .stocktakes
        .list_stocktakes(params.branch_id, list.page, list.limit, &user)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}
