use crate::{
    auth::{entitlement::EntitlementGate, AuthUser},
    db::DbPool,
    entities::dining_table::{self, Entity as DiningTableEntity},
    entities::order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel},
    entities::order_item::{self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity, Model as OrderItemModel},
    entities::payment::{self, ActiveModel as PaymentActiveModel, Entity as PaymentEntity, Model as PaymentModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::invoicing::InvoicingService,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Request/Response types for the order service
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderItemRequest {
    #[validate(length(min = 1, message = "Product name is required"))]
    pub product_name: String,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub branch_id: Uuid,
    #[validate(length(min = 1, message = "Order type is required"))]
    pub order_type: String,
    pub table_id: Option<Uuid>,
    #[validate(length(min = 1, message = "At least one order item is required"))]
    pub items: Vec<OrderItemRequest>,
    /// Payments taken with the order, e.g. a till sale settled on the
    /// spot or an offline submission that was already paid.
    #[serde(default)]
    pub payments: Vec<RecordPaymentRequest>,
    /// Client-side reference, echoed back for offline reconciliation
    pub client_ref: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct AddItemsRequest {
    #[validate(length(min = 1, message = "At least one order item is required"))]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: Option<i32>,
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub method: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, message = "Cancellation reason is required"))]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub client_ref: Option<String>,
    pub order_type: String,
    pub table_id: Option<Uuid>,
    pub status: String,
    pub payment_status: String,
    pub total_amount: Decimal,
    pub cancel_reason: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub payments: Vec<PaymentResponse>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Default)]
pub struct OrderListFilter {
    pub status: Option<String>,
}

/// Service for managing the order lifecycle.
///
/// Every mutation runs in a single transaction; events are emitted only
/// after the transaction commits.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    gate: Arc<EntitlementGate>,
    event_sender: Option<Arc<EventSender>>,
    invoicing: Option<Arc<InvoicingService>>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gate: Arc<EntitlementGate>,
        event_sender: Option<Arc<EventSender>>,
        invoicing: Option<Arc<InvoicingService>>,
    ) -> Self {
        Self {
            db_pool,
            gate,
            event_sender,
            invoicing,
        }
    }

    /// Creates a new order.
    #[instrument(skip(self, request, user), fields(branch_id = %request.branch_id, user_id = %user.user_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        user: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        validate_items(&request.items)?;
        self.gate.ensure_branch(user, request.branch_id).await?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let (order_model, items, payments) =
            self.create_order_in_txn(&txn, &request, user).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_model.id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_model.id, branch_id = %order_model.branch_id, "Order created successfully");

        self.emit(Event::OrderCreated {
            order_id: order_model.id,
            branch_id: order_model.branch_id,
        })
        .await;
        if let Some(table_id) = order_model.table_id {
            self.emit(Event::TableUpdated {
                table_id,
                branch_id: order_model.branch_id,
            })
            .await;
        }

        Ok(model_to_response(order_model, items, payments))
    }

    /// Inserts an order and its items inside an existing transaction.
    ///
    /// Used directly by order creation and by idempotent submission,
    /// which needs the key row in the same transaction. The caller owns
    /// the commit and must emit events afterwards.
    pub(crate) async fn create_order_in_txn(
        &self,
        txn: &DatabaseTransaction,
        request: &CreateOrderRequest,
        user: &AuthUser,
    ) -> Result<(OrderModel, Vec<OrderItemModel>, Vec<PaymentModel>), ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        validate_items(&request.items)?;
        validate_payments(&request.payments)?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let table_id = self.claim_table_in_txn(txn, request).await?;

        let total: Decimal = request
            .items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();
        let paid: Decimal = request.payments.iter().map(|p| p.amount).sum();
        let (status, payment_status) = derive_statuses(total, paid);

        let order_active_model = OrderActiveModel {
            id: Set(order_id),
            branch_id: Set(request.branch_id),
            client_ref: Set(request.client_ref.clone()),
            order_type: Set(request.order_type.clone()),
            table_id: Set(table_id),
            total_amount: Set(total),
            payment_status: Set(payment_status.to_string()),
            status: Set(status.to_string()),
            cancel_reason: Set(None),
            created_by: Set(user.user_id),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let order_model = order_active_model.insert(txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        let mut item_models = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let model = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_name: Set(item.product_name.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                subtotal: Set(item.unit_price * Decimal::from(item.quantity)),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to insert order item");
                ServiceError::DatabaseError(e)
            })?;
            item_models.push(model);
        }

        let mut payment_models = Vec::with_capacity(request.payments.len());
        for payment_req in &request.payments {
            let model = PaymentActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                amount: Set(payment_req.amount),
                method: Set(payment_req.method.clone()),
                paid_at: Set(now),
            }
            .insert(txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to insert order payment");
                ServiceError::DatabaseError(e)
            })?;
            payment_models.push(model);
        }

        Ok((order_model, item_models, payment_models))
    }

    /// Validates and claims the dining table for a dine-in order.
    ///
    /// The availability check runs inside the order transaction so two
    /// concurrent submissions cannot both seat the same table.
    async fn claim_table_in_txn(
        &self,
        txn: &DatabaseTransaction,
        request: &CreateOrderRequest,
    ) -> Result<Option<Uuid>, ServiceError> {
        if request.order_type != order::order_type::DINE_IN {
            if request.table_id.is_some() {
                return Err(ServiceError::InvalidInput(
                    "Only dine-in orders may reference a table".to_string(),
                ));
            }
            return Ok(None);
        }

        let table_id = request.table_id.ok_or_else(|| {
            ServiceError::InvalidInput("Dine-in orders require a table".to_string())
        })?;

        let table = DiningTableEntity::find_by_id(table_id)
            .filter(dining_table::Column::BranchId.eq(request.branch_id))
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound("Table not found in branch".to_string()))?;

        if table.status != dining_table::status::AVAILABLE {
            warn!(table_id = %table_id, "Table already occupied");
            return Err(ServiceError::Conflict("Table is already occupied".to_string()));
        }

        let mut table_active: dining_table::ActiveModel = table.into();
        table_active.status = Set(dining_table::status::OCCUPIED.to_string());
        table_active
            .update(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(Some(table_id))
    }

    /// Retrieves an order with its items and payments.
    #[instrument(skip(self, user), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        user: &AuthUser,
    ) -> Result<Option<OrderResponse>, ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order from database");
                ServiceError::DatabaseError(e)
            })?;

        let Some(order_model) = order else {
            return Ok(None);
        };
        self.gate.ensure_branch(user, order_model.branch_id).await?;

        let items = self.fetch_items(db, order_id).await?;
        let payments = self.fetch_payments(db, order_id).await?;

        Ok(Some(model_to_response(order_model, items, payments)))
    }

    /// Lists orders for a branch with pagination.
    #[instrument(skip(self, user), fields(branch_id = %branch_id))]
    pub async fn list_orders(
        &self,
        branch_id: Uuid,
        filter: OrderListFilter,
        page: u64,
        per_page: u64,
        user: &AuthUser,
    ) -> Result<OrderListResponse, ServiceError> {
        self.gate.ensure_branch(user, branch_id).await?;
        let db = &*self.db_pool;

        let mut query = OrderEntity::find().filter(order::Column::BranchId.eq(branch_id));
        if let Some(status) = &filter.status {
            query = query.filter(order::Column::Status.eq(status.clone()));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;

        let orders = paginator.fetch_page(page.saturating_sub(1)).await.map_err(|e| {
            error!(error = %e, page = page, per_page = per_page, "Failed to fetch orders page");
            ServiceError::DatabaseError(e)
        })?;

        let mut responses = Vec::with_capacity(orders.len());
        for order_model in orders {
            let items = self.fetch_items(db, order_model.id).await?;
            let payments = self.fetch_payments(db, order_model.id).await?;
            responses.push(model_to_response(order_model, items, payments));
        }

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    /// Appends items to an open order and recomputes the total.
    #[instrument(skip(self, request, user), fields(order_id = %order_id))]
    pub async fn add_items(
        &self,
        order_id: Uuid,
        request: AddItemsRequest,
        user: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        validate_items(&request.items)?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = self.load_order_for_update(&txn, order_id, user).await?;
        if order_model.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot add items to a {} order",
                order_model.status
            )));
        }

        let now = Utc::now();
        for item in &request.items {
            OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_name: Set(item.product_name.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                subtotal: Set(item.unit_price * Decimal::from(item.quantity)),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        }

        let updated = self.recompute_totals_in_txn(&txn, order_model).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit add-items transaction");
            ServiceError::DatabaseError(e)
        })?;

        self.emit(Event::OrderUpdated {
            order_id,
            branch_id: updated.branch_id,
        })
        .await;

        let items = self.fetch_items(db, order_id).await?;
        let payments = self.fetch_payments(db, order_id).await?;
        Ok(model_to_response(updated, items, payments))
    }

    /// Changes the quantity or unit price of an existing line item and
    /// recomputes the total.
    #[instrument(skip(self, request, user), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn update_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        request: UpdateItemRequest,
        user: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        if let Some(quantity) = request.quantity {
            if quantity < 1 {
                return Err(ServiceError::InvalidInput(
                    "Quantity must be at least 1".to_string(),
                ));
            }
        }
        if let Some(unit_price) = request.unit_price {
            if unit_price < Decimal::ZERO {
                return Err(ServiceError::InvalidInput(
                    "Unit price cannot be negative".to_string(),
                ));
            }
        }
        if request.quantity.is_none() && request.unit_price.is_none() {
            return Err(ServiceError::InvalidInput(
                "Nothing to update: provide quantity or unit_price".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = self.load_order_for_update(&txn, order_id, user).await?;
        if order_model.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot modify items of a {} order",
                order_model.status
            )));
        }

        let item = self.load_item_in_txn(&txn, order_id, item_id).await?;

        let quantity = request.quantity.unwrap_or(item.quantity);
        let unit_price = request.unit_price.unwrap_or(item.unit_price);

        let mut item_active: OrderItemActiveModel = item.into();
        item_active.quantity = Set(quantity);
        item_active.unit_price = Set(unit_price);
        item_active.subtotal = Set(unit_price * Decimal::from(quantity));
        item_active.updated_at = Set(Some(Utc::now()));
        item_active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let updated = self.recompute_totals_in_txn(&txn, order_model).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit item update transaction");
            ServiceError::DatabaseError(e)
        })?;

        self.emit(Event::OrderUpdated {
            order_id,
            branch_id: updated.branch_id,
        })
        .await;

        let items = self.fetch_items(db, order_id).await?;
        let payments = self.fetch_payments(db, order_id).await?;
        Ok(model_to_response(updated, items, payments))
    }

    /// Removes a line item and recomputes the total. The last item of an
    /// order may be removed; the order stays open with a zero total.
    #[instrument(skip(self, user), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn remove_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        user: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = self.load_order_for_update(&txn, order_id, user).await?;
        if order_model.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot modify items of a {} order",
                order_model.status
            )));
        }

        let item = self.load_item_in_txn(&txn, order_id, item_id).await?;
        let item_active: OrderItemActiveModel = item.into();
        item_active
            .delete(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let updated = self.recompute_totals_in_txn(&txn, order_model).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit item removal transaction");
            ServiceError::DatabaseError(e)
        })?;

        self.emit(Event::OrderUpdated {
            order_id,
            branch_id: updated.branch_id,
        })
        .await;

        let items = self.fetch_items(db, order_id).await?;
        let payments = self.fetch_payments(db, order_id).await?;
        Ok(model_to_response(updated, items, payments))
    }

    async fn load_item_in_txn(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
        item_id: Uuid,
    ) -> Result<OrderItemModel, ServiceError> {
        OrderItemEntity::find_by_id(item_id)
            .filter(order_item::Column::OrderId.eq(order_id))
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound("Order item not found".to_string()))
    }

    /// Records a payment against an open order.
    #[instrument(skip(self, request, user), fields(order_id = %order_id))]
    pub async fn record_payment(
        &self,
        order_id: Uuid,
        request: RecordPaymentRequest,
        user: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "Payment amount must be positive".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = self.load_order_for_update(&txn, order_id, user).await?;
        if order_model.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot record a payment on a {} order",
                order_model.status
            )));
        }
        if order_model.payment_status == order::payment_status::PAID {
            return Err(ServiceError::Conflict(
                "Order is already fully paid".to_string(),
            ));
        }

        PaymentActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount: Set(request.amount),
            method: Set(request.method.clone()),
            paid_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

        let updated = self.recompute_totals_in_txn(&txn, order_model).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit payment transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, amount = %request.amount, "Payment recorded");

        self.emit(Event::PaymentRecorded {
            order_id,
            branch_id: updated.branch_id,
        })
        .await;

        let items = self.fetch_items(db, order_id).await?;
        let payments = self.fetch_payments(db, order_id).await?;
        Ok(model_to_response(updated, items, payments))
    }

    /// Cancels an order with a mandatory reason.
    #[instrument(skip(self, request, user), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        request: CancelOrderRequest,
        user: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = self.load_order_for_update(&txn, order_id, user).await?;
        if order_model.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot cancel a {} order",
                order_model.status
            )));
        }
        if order_model.payment_status == order::payment_status::PAID {
            return Err(ServiceError::InvalidOperation(
                "Cannot cancel a fully paid order".to_string(),
            ));
        }

        let branch_id = order_model.branch_id;
        let table_id = order_model.table_id;
        let now = Utc::now();

        let mut order_active: OrderActiveModel = order_model.into();
        let version = order_active.version.clone().unwrap();
        order_active.status = Set(order::status::CANCELLED.to_string());
        order_active.cancel_reason = Set(Some(request.reason.clone()));
        order_active.updated_at = Set(Some(now));
        order_active.version = Set(version + 1);
        let updated = order_active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if let Some(table_id) = table_id {
            self.release_table_in_txn(&txn, table_id).await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit cancellation transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, reason = %request.reason, "Order cancelled");

        self.emit(Event::OrderCancelled {
            order_id,
            branch_id,
        })
        .await;
        if let Some(table_id) = table_id {
            self.emit(Event::TableUpdated {
                table_id,
                branch_id,
            })
            .await;
        }

        let items = self.fetch_items(db, order_id).await?;
        let payments = self.fetch_payments(db, order_id).await?;
        Ok(model_to_response(updated, items, payments))
    }

    /// Closes a fully paid order, frees its table, and hands the order
    /// off for invoicing.
    #[instrument(skip(self, user), fields(order_id = %order_id))]
    pub async fn close_order(
        &self,
        order_id: Uuid,
        user: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let order_model = self.load_order_for_update(&txn, order_id, user).await?;
        if order_model.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot close a {} order",
                order_model.status
            )));
        }
        if order_model.payment_status != order::payment_status::PAID {
            return Err(ServiceError::InvalidOperation(
                "Order must be fully paid before closing".to_string(),
            ));
        }

        let branch_id = order_model.branch_id;
        let table_id = order_model.table_id;
        let now = Utc::now();

        let mut order_active: OrderActiveModel = order_model.into();
        let version = order_active.version.clone().unwrap();
        order_active.status = Set(order::status::CLOSED.to_string());
        order_active.updated_at = Set(Some(now));
        order_active.version = Set(version + 1);
        let updated = order_active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if let Some(table_id) = table_id {
            self.release_table_in_txn(&txn, table_id).await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit close transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, "Order closed");

        self.emit(Event::OrderClosed {
            order_id,
            branch_id,
        })
        .await;
        if let Some(table_id) = table_id {
            self.emit(Event::TableUpdated {
                table_id,
                branch_id,
            })
            .await;
        }

        let items = self.fetch_items(db, order_id).await?;
        let payments = self.fetch_payments(db, order_id).await?;
        let response = model_to_response(updated, items, payments);

        // Invoicing is fire-and-forget; a failure there never affects
        // the already-committed close.
        if let Some(invoicing) = &self.invoicing {
            let invoicing = invoicing.clone();
            let snapshot = InvoiceSnapshot::from_response(&response);
            tokio::spawn(async move {
                if let Err(e) = invoicing.submit_invoice(&snapshot).await {
                    warn!(order_id = %snapshot.order_id, error = %e, "Invoice submission failed");
                }
            });
        }

        Ok(response)
    }

    async fn load_order_for_update(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
        user: &AuthUser,
    ) -> Result<OrderModel, ServiceError> {
        let order_model = OrderEntity::find_by_id(order_id)
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
        self.gate.ensure_branch(user, order_model.branch_id).await?;
        Ok(order_model)
    }

    /// Recomputes `total_amount` and `payment_status` from current item
    /// and payment rows, persisting the result.
    async fn recompute_totals_in_txn(
        &self,
        txn: &DatabaseTransaction,
        order_model: OrderModel,
    ) -> Result<OrderModel, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_model.id))
            .all(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        let payments = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_model.id))
            .all(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let total: Decimal = items.iter().map(|i| i.subtotal).sum();
        let paid: Decimal = payments.iter().map(|p| p.amount).sum();
        let (status, payment_status) = derive_statuses(total, paid);

        let mut order_active: OrderActiveModel = order_model.into();
        let version = order_active.version.clone().unwrap();
        order_active.total_amount = Set(total);
        order_active.payment_status = Set(payment_status.to_string());
        order_active.status = Set(status.to_string());
        order_active.updated_at = Set(Some(Utc::now()));
        order_active.version = Set(version + 1);

        order_active
            .update(txn)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn release_table_in_txn(
        &self,
        txn: &DatabaseTransaction,
        table_id: Uuid,
    ) -> Result<(), ServiceError> {
        let table = DiningTableEntity::find_by_id(table_id)
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if let Some(table) = table {
            let mut table_active: dining_table::ActiveModel = table.into();
            table_active.status = Set(dining_table::status::AVAILABLE.to_string());
            table_active
                .update(txn)
                .await
                .map_err(ServiceError::DatabaseError)?;
        }
        Ok(())
    }

    async fn fetch_items(
        &self,
        db: &DbPool,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn fetch_payments(
        &self,
        db: &DbPool,
        order_id: Uuid,
    ) -> Result<Vec<PaymentModel>, ServiceError> {
        PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_asc(payment::Column::PaidAt)
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Assembles a full response for an already-committed order.
    pub(crate) async fn response_for(
        &self,
        order_model: OrderModel,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let items = self.fetch_items(db, order_model.id).await?;
        let payments = self.fetch_payments(db, order_model.id).await?;
        Ok(model_to_response(order_model, items, payments))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send(event).await;
        }
    }
}

/// Minimal order snapshot handed to the invoicing collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceSnapshot {
    pub order_id: Uuid,
    pub branch_id: Uuid,
    pub total_amount: Decimal,
    pub closed_at: DateTime<Utc>,
}

impl InvoiceSnapshot {
    fn from_response(response: &OrderResponse) -> Self {
        Self {
            order_id: response.id,
            branch_id: response.branch_id,
            total_amount: response.total_amount,
            closed_at: Utc::now(),
        }
    }
}

/// Lifecycle and payment status as a pure function of the money
/// involved. Only meaningful for orders that are not closed/cancelled.
fn derive_statuses(total: Decimal, paid: Decimal) -> (&'static str, &'static str) {
    if paid <= Decimal::ZERO {
        (order::status::OPEN, order::payment_status::UNPAID)
    } else if paid < total {
        (order::status::OPEN, order::payment_status::PARTIAL)
    } else {
        (order::status::PAID, order::payment_status::PAID)
    }
}

fn validate_payments(payments: &[RecordPaymentRequest]) -> Result<(), ServiceError> {
    for payment in payments {
        payment
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if payment.amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "Payment amount must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_items(items: &[OrderItemRequest]) -> Result<(), ServiceError> {
    for item in items {
        item.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if item.unit_price < Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "Unit price cannot be negative".to_string(),
            ));
        }
    }
    Ok(())
}

pub(crate) fn model_to_response(
    order_model: OrderModel,
    items: Vec<OrderItemModel>,
    payments: Vec<PaymentModel>,
) -> OrderResponse {
    OrderResponse {
        id: order_model.id,
        branch_id: order_model.branch_id,
        client_ref: order_model.client_ref,
        order_type: order_model.order_type,
        table_id: order_model.table_id,
        status: order_model.status,
        payment_status: order_model.payment_status,
        total_amount: order_model.total_amount,
        cancel_reason: order_model.cancel_reason,
        items: items
            .into_iter()
            .map(|i| OrderItemResponse {
                id: i.id,
                product_name: i.product_name,
                quantity: i.quantity,
                unit_price: i.unit_price,
                subtotal: i.subtotal,
            })
            .collect(),
        payments: payments
            .into_iter()
            .map(|p| PaymentResponse {
                id: p.id,
                amount: p.amount,
                method: p.method,
                paid_at: p.paid_at,
            })
            .collect(),
        created_by: order_model.created_by,
        created_at: order_model.created_at,
        updated_at: order_model.updated_at,
        version: order_model.version,
    }
}
