use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::offline::entity::{self, status, ActiveModel, Entity as QueueEntity, Model};
use crate::services::orders::CreateOrderRequest;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Counts per queue state, for status surfaces.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub queued: u64,
    pub sending: u64,
    pub synced: u64,
    pub failed: u64,
}

/// Persistent queue of order submissions on a terminal-local database.
#[derive(Clone)]
pub struct OfflineQueue {
    db: Arc<DbPool>,
}

impl OfflineQueue {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Enqueues a submission, assigning its idempotency key.
    #[instrument(skip(self, request), fields(branch_id = %request.branch_id))]
    pub async fn enqueue(&self, request: &CreateOrderRequest) -> Result<Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let payload = serde_json::to_string(request)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        let now = Utc::now();

        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            idempotency_key: Set(Uuid::new_v4().to_string()),
            payload: Set(payload),
            status: Set(status::QUEUED.to_string()),
            retries: Set(0),
            next_retry_at: Set(None),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| ServiceError::QueueError(format!("Failed to enqueue submission: {}", e)))?;

        info!(submission_id = %model.id, "Submission enqueued");
        Ok(model)
    }

    /// Submissions that are due for delivery, oldest first.
    ///
    /// Picks up fresh `queued` rows and `failed` rows whose retry time
    /// has passed.
    pub async fn due(&self, limit: u64) -> Result<Vec<Model>, ServiceError> {
        let now = Utc::now();
        QueueEntity::find()
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(entity::Column::Status.eq(status::QUEUED))
                            .add(
                                Condition::any()
                                    .add(entity::Column::NextRetryAt.is_null())
                                    .add(entity::Column::NextRetryAt.lte(now)),
                            ),
                    )
                    .add(
                        Condition::all()
                            .add(entity::Column::Status.eq(status::FAILED))
                            .add(entity::Column::NextRetryAt.lte(now)),
                    ),
            )
            .order_by_asc(entity::Column::CreatedAt)
            .paginate(&*self.db, limit)
            .fetch_page(0)
            .await
            .map_err(|e| ServiceError::QueueError(format!("Failed to fetch due submissions: {}", e)))
    }

    pub async fn mark_sending(&self, model: Model) -> Result<Model, ServiceError> {
        self.transition(model, status::SENDING, None, None).await
    }

    pub async fn mark_synced(&self, model: Model) -> Result<Model, ServiceError> {
        self.transition(model, status::SYNCED, None, None).await
    }

    /// Parks a submission until `next_retry_at`, recording the error.
    pub async fn mark_failed(
        &self,
        model: Model,
        error: String,
        next_retry_at: chrono::DateTime<Utc>,
    ) -> Result<Model, ServiceError> {
        let retries = model.retries + 1;
        let mut active: ActiveModel = model.into();
        active.status = Set(status::FAILED.to_string());
        active.retries = Set(retries);
        active.next_retry_at = Set(Some(next_retry_at));
        active.last_error = Set(Some(error));
        active.updated_at = Set(Some(Utc::now()));
        active
            .update(&*self.db)
            .await
            .map_err(|e| ServiceError::QueueError(format!("Failed to update submission: {}", e)))
    }

    /// Returns in-flight rows to `queued`. Called on startup: a crash
    /// mid-delivery leaves rows in `sending`, and the idempotency key
    /// makes re-delivery safe.
    #[instrument(skip(self))]
    pub async fn recover_in_flight(&self) -> Result<u64, ServiceError> {
        let stuck = QueueEntity::find()
            .filter(entity::Column::Status.eq(status::SENDING))
            .all(&*self.db)
            .await
            .map_err(|e| ServiceError::QueueError(e.to_string()))?;

        let count = stuck.len() as u64;
        for model in stuck {
            self.transition(model, status::QUEUED, None, None).await?;
        }

        if count > 0 {
            info!(recovered = count, "Recovered in-flight submissions");
        }
        Ok(count)
    }

    /// Queue depth by state.
    pub async fn depth(&self) -> Result<QueueDepth, ServiceError> {
        Ok(QueueDepth {
            queued: self.count_status(status::QUEUED).await?,
            sending: self.count_status(status::SENDING).await?,
            synced: self.count_status(status::SYNCED).await?,
            failed: self.count_status(status::FAILED).await?,
        })
    }

    async fn count_status(&self, state: &str) -> Result<u64, ServiceError> {
        QueueEntity::find()
            .filter(entity::Column::Status.eq(state))
            .count(&*self.db)
            .await
            .map_err(|e| ServiceError::QueueError(e.to_string()))
    }

    /// Decodes the stored request payload.
    pub fn decode_payload(model: &Model) -> Result<CreateOrderRequest, ServiceError> {
        serde_json::from_str(&model.payload)
            .map_err(|e| ServiceError::SerializationError(format!("Corrupt queue payload: {}", e)))
    }

    async fn transition(
        &self,
        model: Model,
        new_status: &str,
        last_error: Option<String>,
        next_retry_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<Model, ServiceError> {
        let mut active: ActiveModel = model.into();
        active.status = Set(new_status.to_string());
        if last_error.is_some() {
            active.last_error = Set(last_error);
        }
        active.next_retry_at = Set(next_retry_at);
        active.updated_at = Set(Some(Utc::now()));
        active
            .update(&*self.db)
            .await
            .map_err(|e| ServiceError::QueueError(format!("Failed to update submission: {}", e)))
    }
}
