use crate::{
    auth::{entitlement::EntitlementGate, AuthUser},
    db::DbPool,
    entities::idempotency_key::{self, ActiveModel as KeyActiveModel, Entity as KeyEntity},
    entities::order::Entity as OrderEntity,
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::{CreateOrderRequest, OrderResponse, OrderService},
};
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of an idempotent submission.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub order: OrderResponse,
    /// True when the key matched a prior submission and the stored
    /// order was returned instead of creating a new one.
    pub replayed: bool,
}

/// Idempotent order submission.
///
/// The key row is inserted in the same transaction as the order, so a
/// key exists if and only if its order does. Duplicate submissions are
/// resolved either by the pre-check or, under concurrency, by the
/// unique index on the key column: the losing transaction rolls back
/// and the stored order is fetched instead.
#[derive(Clone)]
pub struct IdempotencyService {
    db_pool: Arc<DbPool>,
    orders: OrderService,
    gate: Arc<EntitlementGate>,
    event_sender: Option<Arc<EventSender>>,
    ttl_hours: i64,
}

impl IdempotencyService {
    pub fn new(
        db_pool: Arc<DbPool>,
        orders: OrderService,
        gate: Arc<EntitlementGate>,
        event_sender: Option<Arc<EventSender>>,
        ttl_hours: i64,
    ) -> Self {
        Self {
            db_pool,
            orders,
            gate,
            event_sender,
            ttl_hours,
        }
    }

    /// Submits an order under an idempotency key.
    #[instrument(skip(self, request, user), fields(key = %key, user_id = %user.user_id))]
    pub async fn submit(
        &self,
        key: String,
        request: CreateOrderRequest,
        user: &AuthUser,
    ) -> Result<SubmitOutcome, ServiceError> {
        if key.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "Idempotency key must not be empty".to_string(),
            ));
        }

        self.gate.ensure_branch(user, request.branch_id).await?;

        // Fast path: the key already exists and is still live.
        if let Some(outcome) = self.try_replay(&key, user.user_id).await? {
            return Ok(outcome);
        }

        let db = &*self.db_pool;
        let now = Utc::now();
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for idempotent submission");
            ServiceError::DatabaseError(e)
        })?;

        let (order_model, items, payments) =
            self.orders.create_order_in_txn(&txn, &request, user).await?;

        let key_insert = KeyActiveModel {
            id: Set(Uuid::new_v4()),
            key: Set(key.clone()),
            user_id: Set(user.user_id),
            order_id: Set(order_model.id),
            created_at: Set(now),
            expires_at: Set(now + ChronoDuration::hours(self.ttl_hours)),
        }
        .insert(&txn)
        .await;

        match key_insert {
            Ok(_) => {
                txn.commit().await.map_err(|e| {
                    error!(error = %e, order_id = %order_model.id, "Failed to commit idempotent submission");
                    ServiceError::DatabaseError(e)
                })?;

                info!(order_id = %order_model.id, "Idempotent submission accepted");

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

                Ok(SubmitOutcome {
                    order: crate::services::orders::model_to_response(order_model, items, payments),
                    replayed: false,
                })
            }
            Err(e) => {
                // A concurrent submission with the same key won the
                // race. Roll back our order and replay theirs.
                warn!(key = %key, error = %e, "Idempotency key collision, replaying stored order");
                let _ = txn.rollback().await;

                match self.try_replay(&key, user.user_id).await? {
                    Some(outcome) => Ok(outcome),
                    None => Err(ServiceError::Conflict(
                        "Idempotency key conflict could not be resolved".to_string(),
                    )),
                }
            }
        }
    }

    /// Returns the stored order when a live key exists for this caller.
    /// Keys are scoped per user, so one caller's key never replays
    /// another caller's order. Expired keys are purged lazily so the
    /// same key can be reused for a fresh order.
    async fn try_replay(
        &self,
        key: &str,
        user_id: Uuid,
    ) -> Result<Option<SubmitOutcome>, ServiceError> {
        let db = &*self.db_pool;

        let existing = KeyEntity::find()
            .filter(idempotency_key::Column::Key.eq(key))
            .filter(idempotency_key::Column::UserId.eq(user_id))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let Some(key_row) = existing else {
            return Ok(None);
        };

        if key_row.expires_at <= Utc::now() {
            info!(key = %key, "Idempotency key expired, treating submission as new");
            key_row
                .delete(db)
                .await
                .map_err(ServiceError::DatabaseError)?;
            return Ok(None);
        }

        let order_model = OrderEntity::find_by_id(key_row.order_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::InternalError(
                    "Idempotency key points at a missing order".to_string(),
                )
            })?;

        let order = self.orders.response_for(order_model).await?;
        Ok(Some(SubmitOutcome {
            order,
            replayed: true,
        }))
    }

    /// Deletes all expired keys. Called opportunistically; replay
    /// correctness does not depend on it.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<u64, ServiceError> {
        let db = &*self.db_pool;
        let result = KeyEntity::delete_many()
            .filter(idempotency_key::Column::ExpiresAt.lte(Utc::now()))
            .exec(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if result.rows_affected > 0 {
            info!(purged = result.rows_affected, "Purged expired idempotency keys");
        }
        Ok(result.rows_affected)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send(event).await;
        }
    }
}
