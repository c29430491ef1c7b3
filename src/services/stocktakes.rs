use crate::{
    auth::{entitlement::EntitlementGate, AuthUser},
    db::DbPool,
    entities::inventory_transaction::{self, kind, ActiveModel as InvTxnActiveModel},
    entities::stocktake::{self, ActiveModel as StocktakeActiveModel, Entity as StocktakeEntity, Model as StocktakeModel},
    entities::stocktake_item::{self, ActiveModel as ItemActiveModel, Entity as ItemEntity, Model as ItemModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StocktakeLineRequest {
    pub ingredient_id: Uuid,
    pub actual_qty: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateStocktakeRequest {
    pub branch_id: Uuid,
    #[validate(length(min = 1, message = "At least one counted line is required"))]
    pub lines: Vec<StocktakeLineRequest>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StocktakeItemResponse {
    pub id: Uuid,
    pub ingredient_id: Uuid,
    pub system_qty: Decimal,
    pub actual_qty: Decimal,
    pub delta: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StocktakeResponse {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub status: String,
    pub note: Option<String>,
    pub items: Vec<StocktakeItemResponse>,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StocktakeListResponse {
    pub stocktakes: Vec<StocktakeResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, FromQueryResult)]
struct KindTotal {
    kind: String,
    total: Option<Decimal>,
}

/// Physical count reconciliation.
///
/// Creating a stocktake freezes the system quantity and delta per line;
/// approval posts the deltas to the inventory ledger as adjustments.
#[derive(Clone)]
pub struct StocktakeService {
    db_pool: Arc<DbPool>,
    gate: Arc<EntitlementGate>,
    event_sender: Option<Arc<EventSender>>,
}

impl StocktakeService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gate: Arc<EntitlementGate>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            gate,
            event_sender,
        }
    }

    /// Creates a draft stocktake, snapshotting system quantities.
    #[instrument(skip(self, request, user), fields(branch_id = %request.branch_id, lines = request.lines.len()))]
    pub async fn create_stocktake(
        &self,
        request: CreateStocktakeRequest,
        user: &AuthUser,
    ) -> Result<StocktakeResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let mut seen = std::collections::HashSet::new();
        for line in &request.lines {
            if !seen.insert(line.ingredient_id) {
                return Err(ServiceError::InvalidInput(format!(
                    "Ingredient {} counted more than once",
                    line.ingredient_id
                )));
            }
        }

        self.gate.ensure_branch(user, request.branch_id).await?;

        let db = &*self.db_pool;
        let now = Utc::now();
        let stocktake_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for stocktake creation");
            ServiceError::DatabaseError(e)
        })?;

        let stocktake_model = StocktakeActiveModel {
            id: Set(stocktake_id),
            branch_id: Set(request.branch_id),
            status: Set(stocktake::status::DRAFT.to_string()),
            note: Set(request.note.clone()),
            created_by: Set(user.user_id),
            approved_by: Set(None),
            created_at: Set(now),
            approved_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert stocktake");
            ServiceError::DatabaseError(e)
        })?;

        let mut item_models = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            // The snapshot is taken inside the transaction so all lines
            // see the ledger at the same point in time.
            let system_qty =
                on_hand_in(&txn, request.branch_id, line.ingredient_id).await?;
            let delta = line.actual_qty - system_qty;

            let item = ItemActiveModel {
                id: Set(Uuid::new_v4()),
                stocktake_id: Set(stocktake_id),
                ingredient_id: Set(line.ingredient_id),
                system_qty: Set(system_qty),
                actual_qty: Set(line.actual_qty),
                delta: Set(delta),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
            item_models.push(item);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, stocktake_id = %stocktake_id, "Failed to commit stocktake creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(stocktake_id = %stocktake_id, branch_id = %request.branch_id, "Stocktake created");

        self.emit(Event::StocktakeCreated {
            stocktake_id,
            branch_id: request.branch_id,
        })
        .await;

        Ok(model_to_response(stocktake_model, item_models))
    }

    /// Approves a draft stocktake, posting its deltas to the ledger.
    #[instrument(skip(self, user), fields(stocktake_id = %stocktake_id))]
    pub async fn approve_stocktake(
        &self,
        stocktake_id: Uuid,
        user: &AuthUser,
    ) -> Result<StocktakeResponse, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for stocktake approval");
            ServiceError::DatabaseError(e)
        })?;

        let stocktake_model = StocktakeEntity::find_by_id(stocktake_id)
            .one(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound("Stocktake not found".to_string()))?;

        self.gate
            .ensure_branch(user, stocktake_model.branch_id)
            .await?;

        if stocktake_model.status != stocktake::status::DRAFT {
            return Err(ServiceError::Conflict(format!(
                "Stocktake is already {}",
                stocktake_model.status
            )));
        }

        let items = ItemEntity::find()
            .filter(stocktake_item::Column::StocktakeId.eq(stocktake_id))
            .all(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        // The frozen deltas are posted as-is, even if the ledger moved
        // since the count was taken.
        for item in &items {
            if item.delta == Decimal::ZERO {
                continue;
            }
            InvTxnActiveModel {
                id: Set(Uuid::new_v4()),
                branch_id: Set(stocktake_model.branch_id),
                ingredient_id: Set(item.ingredient_id),
                kind: Set(kind::ADJUST.to_string()),
                quantity: Set(item.delta),
                unit_cost: Set(None),
                reason: Set(Some("stocktake".to_string())),
                order_id: Set(None),
                stocktake_id: Set(Some(stocktake_id)),
                created_by: Set(user.user_id),
                created_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, ingredient_id = %item.ingredient_id, "Failed to post stocktake adjustment");
                ServiceError::DatabaseError(e)
            })?;
        }

        let branch_id = stocktake_model.branch_id;
        let mut active: StocktakeActiveModel = stocktake_model.into();
        active.status = Set(stocktake::status::APPROVED.to_string());
        active.approved_by = Set(Some(user.user_id));
        active.approved_at = Set(Some(now));
        let updated = active
            .update(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, stocktake_id = %stocktake_id, "Failed to commit stocktake approval");
            ServiceError::DatabaseError(e)
        })?;

        info!(stocktake_id = %stocktake_id, "Stocktake approved");

        self.emit(Event::StocktakeApproved {
            stocktake_id,
            branch_id,
        })
        .await;

        Ok(model_to_response(updated, items))
    }

    /// Retrieves a stocktake with its items.
    #[instrument(skip(self, user), fields(stocktake_id = %stocktake_id))]
    pub async fn get_stocktake(
        &self,
        stocktake_id: Uuid,
        user: &AuthUser,
    ) -> Result<Option<StocktakeResponse>, ServiceError> {
        let db = &*self.db_pool;

        let stocktake_model = StocktakeEntity::find_by_id(stocktake_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let Some(stocktake_model) = stocktake_model else {
            return Ok(None);
        };
        self.gate
            .ensure_branch(user, stocktake_model.branch_id)
            .await?;

        let items = ItemEntity::find()
            .filter(stocktake_item::Column::StocktakeId.eq(stocktake_id))
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(Some(model_to_response(stocktake_model, items)))
    }

    /// Lists the counted lines of one stocktake.
    #[instrument(skip(self, user), fields(stocktake_id = %stocktake_id))]
    pub async fn stocktake_items(
        &self,
        stocktake_id: Uuid,
        user: &AuthUser,
    ) -> Result<Vec<StocktakeItemResponse>, ServiceError> {
        let db = &*self.db_pool;

        let stocktake_model = StocktakeEntity::find_by_id(stocktake_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound("Stocktake not found".to_string()))?;
        self.gate
            .ensure_branch(user, stocktake_model.branch_id)
            .await?;

        let items = ItemEntity::find()
            .filter(stocktake_item::Column::StocktakeId.eq(stocktake_id))
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(items
            .into_iter()
            .map(|i| StocktakeItemResponse {
                id: i.id,
                ingredient_id: i.ingredient_id,
                system_qty: i.system_qty,
                actual_qty: i.actual_qty,
                delta: i.delta,
            })
            .collect())
    }

    /// Lists stocktakes for a branch, newest first.
    #[instrument(skip(self, user), fields(branch_id = %branch_id))]
    pub async fn list_stocktakes(
        &self,
        branch_id: Uuid,
        page: u64,
        per_page: u64,
        user: &AuthUser,
    ) -> Result<StocktakeListResponse, ServiceError> {
        self.gate.ensure_branch(user, branch_id).await?;
        let db = &*self.db_pool;

        let paginator = StocktakeEntity::find()
            .filter(stocktake::Column::BranchId.eq(branch_id))
            .order_by_desc(stocktake::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let stocktakes = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;

        let mut responses = Vec::with_capacity(stocktakes.len());
        for model in stocktakes {
            let items = ItemEntity::find()
                .filter(stocktake_item::Column::StocktakeId.eq(model.id))
                .all(db)
                .await
                .map_err(ServiceError::DatabaseError)?;
            responses.push(model_to_response(model, items));
        }

        Ok(StocktakeListResponse {
            stocktakes: responses,
            total,
            page,
            per_page,
        })
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send(event).await;
        }
    }
}

/// Ledger-derived balance usable on either a pool or a transaction.
async fn on_hand_in<C: ConnectionTrait>(
    conn: &C,
    branch_id: Uuid,
    ingredient_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let totals: Vec<KindTotal> = inventory_transaction::Entity::find()
        .select_only()
        .column(inventory_transaction::Column::Kind)
        .column_as(inventory_transaction::Column::Quantity.sum(), "total")
        .filter(inventory_transaction::Column::BranchId.eq(branch_id))
        .filter(inventory_transaction::Column::IngredientId.eq(ingredient_id))
        .group_by(inventory_transaction::Column::Kind)
        .into_model::<KindTotal>()
        .all(conn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let mut on_hand = Decimal::ZERO;
    for row in totals {
        let total = row.total.unwrap_or(Decimal::ZERO);
        match row.kind.as_str() {
            kind::IN | kind::ADJUST => on_hand += total,
            kind::OUT => on_hand -= total,
            _ => {}
        }
    }
    Ok(on_hand)
}

fn model_to_response(model: StocktakeModel, items: Vec<ItemModel>) -> StocktakeResponse {
    StocktakeResponse {
        id: model.id,
        branch_id: model.branch_id,
        status: model.status,
        note: model.note,
        items: items
            .into_iter()
            .map(|i| StocktakeItemResponse {
                id: i.id,
                ingredient_id: i.ingredient_id,
                system_qty: i.system_qty,
                actual_qty: i.actual_qty,
                delta: i.delta,
            })
            .collect(),
        created_by: model.created_by,
        approved_by: model.approved_by,
        created_at: model.created_at,
        approved_at: model.approved_at,
    }
}
