use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{dining_table, order};
use crate::errors::ServiceError;
use crate::services::orders::{
    AddItemsRequest, CancelOrderRequest, CreateOrderRequest, OrderListFilter, OrderListResponse,
    OrderResponse, RecordPaymentRequest, UpdateItemRequest,
};
use crate::{auth::AuthUser, ApiResponse, ApiResult, AppState, ListQuery};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Submission result; `replayed` is true when the idempotency key
/// matched a prior submission.
#[derive(Debug, Serialize)]
pub struct SubmitOrderResponse {
    pub replayed: bool,
    #[serde(flatten)]
    pub order: OrderResponse,
}

fn validate_status_filter(status: &str) -> Result<(), ServiceError> {
    match status {
        order::status::OPEN
        | order::status::PAID
        | order::status::CLOSED
        | order::status::CANCELLED => Ok(()),
        other => Err(ServiceError::InvalidStatus(format!(
            "Unknown order status: {other}"
        ))),
    }
}

/// POST /orders
///
/// With an `Idempotency-Key` header the submission is deduplicated;
/// without one every call creates a new order. First creation answers
/// 201, a replay answers 200.
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SubmitOrderResponse>>), ServiceError> {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let response = match key {
        Some(key) => {
            let outcome = state.services.idempotency.submit(key, request, &user).await?;
            SubmitOrderResponse {
                replayed: outcome.replayed,
                order: outcome.order,
            }
        }
        None => {
            let order = state.services.orders.create_order(request, &user).await?;
            SubmitOrderResponse {
                replayed: false,
                order,
            }
        }
    };

    let status = if response.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApiResponse::success(response))))
}

/// GET /orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .get_order(id, &user)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {} not found", id)))?;
    Ok(Json(ApiResponse::success(order)))
}

#[derive(Debug, Deserialize)]
pub struct OrderListParams {
    pub branch_id: Uuid,
    pub status: Option<String>,
}

/// GET /orders?branch_id=...&status=...
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<OrderListParams>,
    Query(list): Query<ListQuery>,
) -> ApiResult<OrderListResponse> {
    if let Some(status) = &params.status {
        validate_status_filter(status)?;
    }
    let response = state
        .services
        .orders
        .list_orders(
            params.branch_id,
            OrderListFilter {
                status: params.status,
            },
            list.page,
            list.limit,
            &user,
        )
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// POST /orders/:id/items
pub async fn add_order_items(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<AddItemsRequest>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.add_items(id, request, &user).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// PATCH /orders/:id/items/:item_id
pub async fn update_order_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateItemRequest>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .update_item(id, item_id, request, &user)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// DELETE /orders/:id/items/:item_id
pub async fn remove_order_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .remove_item(id, item_id, &user)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /orders/:id/payments
pub async fn record_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<RecordPaymentRequest>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .record_payment(id, request, &user)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// DELETE /orders/:id — cancellation, reason carried in the body
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .cancel_order(id, request, &user)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// POST /orders/:id/close
pub async fn close_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.close_order(id, &user).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[derive(Debug, Serialize)]
pub struct TableResponse {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct TableListParams {
    pub branch_id: Uuid,
}

/// GET /tables?branch_id=...
pub async fn list_tables(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<TableListParams>,
) -> ApiResult<Vec<TableResponse>> {
    state
        .services
        .gate
        .ensure_branch(&user, params.branch_id)
        .await?;

    let tables = dining_table::Entity::find()
        .filter(dining_table::Column::BranchId.eq(params.branch_id))
        .order_by_asc(dining_table::Column::Name)
        .all(&*state.db)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let response = tables
        .into_iter()
        .map(|t| TableResponse {
            id: t.id,
            branch_id: t.branch_id,
            name: t.name,
            status: t.status,
        })
        .collect();

    Ok(Json(ApiResponse::success(response)))
}
