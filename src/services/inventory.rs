use crate::{
    auth::{entitlement::EntitlementGate, AuthUser},
    db::DbPool,
    entities::inventory_transaction::{
        self, kind, ActiveModel as TxnActiveModel, Entity as TxnEntity, Model as TxnModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InventoryEntryRequest {
    pub ingredient_id: Uuid,
    #[validate(length(min = 1, message = "Transaction kind is required"))]
    pub kind: String,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reason: Option<String>,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RecordBatchRequest {
    pub branch_id: Uuid,
    #[validate(length(min = 1, message = "At least one entry is required"))]
    pub entries: Vec<InventoryEntryRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InventoryTransactionResponse {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub ingredient_id: Uuid,
    pub kind: String,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reason: Option<String>,
    pub order_id: Option<Uuid>,
    pub stocktake_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InventoryListResponse {
    pub transactions: Vec<InventoryTransactionResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OnHandResponse {
    pub branch_id: Uuid,
    pub ingredient_id: Uuid,
    pub on_hand: Decimal,
}

/// Entry for the kind-scoped write endpoints, where the route itself
/// fixes the transaction kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindEntryRequest {
    pub ingredient_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reason: Option<String>,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct KindBatchRequest {
    pub branch_id: Uuid,
    #[validate(length(min = 1, message = "At least one entry is required"))]
    pub entries: Vec<KindEntryRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovementReportRow {
    pub ingredient_id: Uuid,
    pub total_in: Decimal,
    pub total_out: Decimal,
    pub total_adjust: Decimal,
    pub on_hand: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovementReportResponse {
    pub branch_id: Uuid,
    pub rows: Vec<MovementReportRow>,
}

#[derive(Debug, FromQueryResult)]
struct KindTotal {
    kind: String,
    total: Option<Decimal>,
}

#[derive(Debug, FromQueryResult)]
struct IngredientKindTotal {
    ingredient_id: Uuid,
    kind: String,
    total: Option<Decimal>,
}

/// Append-only inventory ledger.
///
/// Rows are never updated or deleted; the on-hand balance for an
/// ingredient is always derived from the full ledger. Negative balances
/// are representable and allowed.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    gate: Arc<EntitlementGate>,
    event_sender: Option<Arc<EventSender>>,
}

impl InventoryService {
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

    /// Records a batch of ledger entries atomically. Either every entry
    /// lands or none do.
    #[instrument(skip(self, request, user), fields(branch_id = %request.branch_id, entries = request.entries.len()))]
    pub async fn record_batch(
        &self,
        request: RecordBatchRequest,
        user: &AuthUser,
    ) -> Result<Vec<InventoryTransactionResponse>, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        for entry in &request.entries {
            validate_entry(entry)?;
        }
        self.gate.ensure_branch(user, request.branch_id).await?;

        let db = &*self.db_pool;
        let now = Utc::now();
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for inventory batch");
            ServiceError::DatabaseError(e)
        })?;

        let mut models = Vec::with_capacity(request.entries.len());
        for entry in &request.entries {
            let model = TxnActiveModel {
                id: Set(Uuid::new_v4()),
                branch_id: Set(request.branch_id),
                ingredient_id: Set(entry.ingredient_id),
                kind: Set(entry.kind.clone()),
                quantity: Set(entry.quantity),
                unit_cost: Set(entry.unit_cost),
                reason: Set(entry.reason.clone()),
                order_id: Set(entry.order_id),
                stocktake_id: Set(None),
                created_by: Set(user.user_id),
                created_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, ingredient_id = %entry.ingredient_id, "Failed to insert inventory transaction");
                ServiceError::DatabaseError(e)
            })?;
            models.push(model);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit inventory batch");
            ServiceError::DatabaseError(e)
        })?;

        info!(branch_id = %request.branch_id, count = models.len(), "Inventory batch recorded");

        self.emit(Event::InventoryRecorded {
            branch_id: request.branch_id,
            count: models.len(),
        })
        .await;

        Ok(models.into_iter().map(model_to_response).collect())
    }

    /// Records a batch where every entry shares the kind named by the
    /// route (`/inventory/inputs`, `/issues`, `/adjustments`).
    pub async fn record_kind_batch(
        &self,
        entry_kind: &str,
        request: KindBatchRequest,
        user: &AuthUser,
    ) -> Result<Vec<InventoryTransactionResponse>, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let entries = request
            .entries
            .into_iter()
            .map(|entry| InventoryEntryRequest {
                ingredient_id: entry.ingredient_id,
                kind: entry_kind.to_string(),
                quantity: entry.quantity,
                unit_cost: entry.unit_cost,
                reason: entry.reason,
                order_id: entry.order_id,
            })
            .collect();

        self.record_batch(
            RecordBatchRequest {
                branch_id: request.branch_id,
                entries,
            },
            user,
        )
        .await
    }

    /// Derives the current on-hand balance for one ingredient.
    #[instrument(skip(self, user), fields(branch_id = %branch_id, ingredient_id = %ingredient_id))]
    pub async fn on_hand(
        &self,
        branch_id: Uuid,
        ingredient_id: Uuid,
        user: &AuthUser,
    ) -> Result<OnHandResponse, ServiceError> {
        self.gate.ensure_branch(user, branch_id).await?;
        let db = &*self.db_pool;

        let totals: Vec<KindTotal> = TxnEntity::find()
            .select_only()
            .column(inventory_transaction::Column::Kind)
            .column_as(inventory_transaction::Column::Quantity.sum(), "total")
            .filter(inventory_transaction::Column::BranchId.eq(branch_id))
            .filter(inventory_transaction::Column::IngredientId.eq(ingredient_id))
            .group_by(inventory_transaction::Column::Kind)
            .into_model::<KindTotal>()
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to aggregate inventory ledger");
                ServiceError::DatabaseError(e)
            })?;

        let mut on_hand = Decimal::ZERO;
        for row in totals {
            let total = row.total.unwrap_or(Decimal::ZERO);
            match row.kind.as_str() {
                kind::IN => on_hand += total,
                kind::OUT => on_hand -= total,
                kind::ADJUST => on_hand += total,
                other => {
                    return Err(ServiceError::InternalError(format!(
                        "Unknown inventory transaction kind in ledger: {}",
                        other
                    )))
                }
            }
        }

        Ok(OnHandResponse {
            branch_id,
            ingredient_id,
            on_hand,
        })
    }

    /// Aggregated in/out/adjust totals per ingredient for a branch,
    /// with the derived on-hand balance.
    #[instrument(skip(self, user), fields(branch_id = %branch_id))]
    pub async fn movement_report(
        &self,
        branch_id: Uuid,
        user: &AuthUser,
    ) -> Result<MovementReportResponse, ServiceError> {
        self.gate.ensure_branch(user, branch_id).await?;
        let db = &*self.db_pool;

        let totals: Vec<IngredientKindTotal> = TxnEntity::find()
            .select_only()
            .column(inventory_transaction::Column::IngredientId)
            .column(inventory_transaction::Column::Kind)
            .column_as(inventory_transaction::Column::Quantity.sum(), "total")
            .filter(inventory_transaction::Column::BranchId.eq(branch_id))
            .group_by(inventory_transaction::Column::IngredientId)
            .group_by(inventory_transaction::Column::Kind)
            .into_model::<IngredientKindTotal>()
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to aggregate movement report");
                ServiceError::DatabaseError(e)
            })?;

        let mut by_ingredient: BTreeMap<Uuid, MovementReportRow> = BTreeMap::new();
        for row in totals {
            let entry = by_ingredient
                .entry(row.ingredient_id)
                .or_insert_with(|| MovementReportRow {
                    ingredient_id: row.ingredient_id,
                    total_in: Decimal::ZERO,
                    total_out: Decimal::ZERO,
                    total_adjust: Decimal::ZERO,
                    on_hand: Decimal::ZERO,
                });
            let total = row.total.unwrap_or(Decimal::ZERO);
            match row.kind.as_str() {
                kind::IN => entry.total_in += total,
                kind::OUT => entry.total_out += total,
                kind::ADJUST => entry.total_adjust += total,
                other => {
                    return Err(ServiceError::InternalError(format!(
                        "Unknown inventory transaction kind in ledger: {}",
                        other
                    )))
                }
            }
        }
        for entry in by_ingredient.values_mut() {
            entry.on_hand = entry.total_in - entry.total_out + entry.total_adjust;
        }

        Ok(MovementReportResponse {
            branch_id,
            rows: by_ingredient.into_values().collect(),
        })
    }

    /// Lists ledger entries for a branch, newest first.
    #[instrument(skip(self, user), fields(branch_id = %branch_id))]
    pub async fn list_transactions(
        &self,
        branch_id: Uuid,
        ingredient_id: Option<Uuid>,
        page: u64,
        per_page: u64,
        user: &AuthUser,
    ) -> Result<InventoryListResponse, ServiceError> {
        self.gate.ensure_branch(user, branch_id).await?;
        let db = &*self.db_pool;

        let mut query = TxnEntity::find().filter(inventory_transaction::Column::BranchId.eq(branch_id));
        if let Some(ingredient_id) = ingredient_id {
            query = query.filter(inventory_transaction::Column::IngredientId.eq(ingredient_id));
        }

        let paginator = query
            .order_by_desc(inventory_transaction::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let transactions = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(InventoryListResponse {
            transactions: transactions.into_iter().map(model_to_response).collect(),
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

/// Kind-specific quantity rules: `in` and `out` are positive
/// magnitudes, `adjust` is a signed non-zero correction.
fn validate_entry(entry: &InventoryEntryRequest) -> Result<(), ServiceError> {
    entry
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    match entry.kind.as_str() {
        kind::IN | kind::OUT => {
            if entry.quantity <= Decimal::ZERO {
                return Err(ServiceError::InventoryError(format!(
                    "Quantity for '{}' entries must be positive",
                    entry.kind
                )));
            }
        }
        kind::ADJUST => {
            if entry.quantity == Decimal::ZERO {
                return Err(ServiceError::InventoryError(
                    "Adjustment quantity must be non-zero".to_string(),
                ));
            }
        }
        other => {
            return Err(ServiceError::InvalidInput(format!(
                "Unknown inventory transaction kind: {}",
                other
            )));
        }
    }

    if let Some(unit_cost) = entry.unit_cost {
        if unit_cost < Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "Unit cost cannot be negative".to_string(),
            ));
        }
    }

    Ok(())
}

fn model_to_response(model: TxnModel) -> InventoryTransactionResponse {
    InventoryTransactionResponse {
        id: model.id,
        branch_id: model.branch_id,
        ingredient_id: model.ingredient_id,
        kind: model.kind,
        quantity: model.quantity,
        unit_cost: model.unit_cost,
        reason: model.reason,
        order_id: model.order_id,
        stocktake_id: model.stocktake_id,
        created_by: model.created_by,
        created_at: model.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &str, quantity: Decimal) -> InventoryEntryRequest {
        InventoryEntryRequest {
            ingredient_id: Uuid::new_v4(),
            kind: kind.to_string(),
            quantity,
            unit_cost: None,
            reason: None,
            order_id: None,
        }
    }

    #[test]
    fn rejects_zero_quantity_movements() {
        assert!(validate_entry(&entry(kind::IN, Decimal::ZERO)).is_err());
        assert!(validate_entry(&entry(kind::OUT, Decimal::ZERO)).is_err());
        assert!(validate_entry(&entry(kind::ADJUST, Decimal::ZERO)).is_err());
    }

    #[test]
    fn rejects_negative_in_and_out() {
        assert!(validate_entry(&entry(kind::IN, Decimal::new(-5, 0))).is_err());
        assert!(validate_entry(&entry(kind::OUT, Decimal::new(-5, 0))).is_err());
    }

    #[test]
    fn adjust_may_be_negative() {
        assert!(validate_entry(&entry(kind::ADJUST, Decimal::new(-3, 0))).is_ok());
        assert!(validate_entry(&entry(kind::ADJUST, Decimal::new(3, 0))).is_ok());
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(validate_entry(&entry("transfer", Decimal::ONE)).is_err());
    }
}
