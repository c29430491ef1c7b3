//! BranchPoint API Library
//!
//! Transactional order and inventory core for multi-branch retail and
//! restaurant deployments: idempotent offline submission, an append-only
//! inventory ledger, and branch-scoped realtime propagation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod offline;
pub mod services;

use axum::{
    response::Json,
    routing::{delete, get, patch, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::permission as perm;
use crate::auth::AuthRouterExt;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub broadcaster: Arc<events::EventBroadcaster>,
    pub services: services::AppServices,
    pub auth: Arc<auth::AuthService>,
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
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

// Enhanced API routes function
pub fn api_v1_routes() -> Router<AppState> {
    // Orders routes with permission gating
    let orders_read = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .with_permission(perm::ORDERS_READ);

    let orders_create = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .with_permission(perm::ORDERS_CREATE);

    let orders_update = Router::new()
        .route("/orders/:id/items", post(handlers::orders::add_order_items))
        .route(
            "/orders/:id/items/:item_id",
            patch(handlers::orders::update_order_item)
                .delete(handlers::orders::remove_order_item),
        )
        .route(
            "/orders/:id/payments",
            post(handlers::orders::record_payment),
        )
        .with_permission(perm::ORDERS_UPDATE);

    let orders_cancel = Router::new()
        .route("/orders/:id", delete(handlers::orders::cancel_order))
        .with_permission(perm::ORDERS_CANCEL);

    let orders_close = Router::new()
        .route("/orders/:id/close", post(handlers::orders::close_order))
        .with_permission(perm::ORDERS_CLOSE);

    // Dining tables
    let tables_read = Router::new()
        .route("/tables", get(handlers::orders::list_tables))
        .with_permission(perm::TABLES_READ);

    // Inventory ledger routes
    let inventory_read = Router::new()
        .route(
            "/inventory/transactions",
            get(handlers::inventory::list_transactions),
        )
        .route(
            "/inventory/on-hand/:ingredient_id",
            get(handlers::inventory::get_on_hand),
        )
        .route(
            "/reports/inventory",
            get(handlers::inventory::movement_report),
        )
        .with_permission(perm::INVENTORY_READ);

    let inventory_record = Router::new()
        .route("/inventory/inputs", post(handlers::inventory::record_inputs))
        .route("/inventory/issues", post(handlers::inventory::record_issues))
        .route(
            "/inventory/adjustments",
            post(handlers::inventory::record_adjustments),
        )
        .with_permission(perm::INVENTORY_RECORD);

    // Stocktake routes
    let stocktakes_read = Router::new()
        .route("/stocktakes", get(handlers::stocktakes::list_stocktakes))
        .route("/stocktakes/:id", get(handlers::stocktakes::get_stocktake))
        .route(
            "/stocktakes/:id/items",
            get(handlers::stocktakes::list_stocktake_items),
        )
        .with_permission(perm::STOCKTAKES_READ);

    let stocktakes_create = Router::new()
        .route("/stocktakes", post(handlers::stocktakes::create_stocktake))
        .with_permission(perm::STOCKTAKES_CREATE);

    let stocktakes_approve = Router::new()
        .route(
            "/stocktakes/:id/approve",
            post(handlers::stocktakes::approve_stocktake),
        )
        .with_permission(perm::STOCKTAKES_APPROVE);

    // Realtime stream; authenticates via token query parameter inside
    // the handler, so no auth middleware here.
    let realtime = Router::new().route("/realtime/ws", get(handlers::realtime::realtime_ws));

    Router::new()
        .merge(orders_read)
        .merge(orders_create)
        .merge(orders_update)
        .merge(orders_cancel)
        .merge(orders_close)
        .merge(tables_read)
        .merge(inventory_read)
        .merge(inventory_record)
        .merge(stocktakes_read)
        .merge(stocktakes_create)
        .merge(stocktakes_approve)
        .merge(realtime)
}

/// Liveness endpoint, mounted outside the authenticated API tree.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
