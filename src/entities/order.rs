use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of an order.
pub mod status {
    pub const OPEN: &str = "open";
    pub const PAID: &str = "paid";
    pub const CLOSED: &str = "closed";
    pub const CANCELLED: &str = "cancelled";
}

/// Payment coverage relative to the order total.
pub mod payment_status {
    pub const UNPAID: &str = "unpaid";
    pub const PARTIAL: &str = "partial";
    pub const PAID: &str = "paid";
}

pub mod order_type {
    pub const DINE_IN: &str = "dine_in";
    pub const TAKE_AWAY: &str = "take_away";
    pub const DELIVERY: &str = "delivery";
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub branch_id: Uuid,
    /// Caller-supplied correlation reference (offline client ids and the like)
    pub client_ref: Option<String>,
    pub order_type: String,
    pub table_id: Option<Uuid>,
    /// Derived projection: sum of item subtotals, recomputed on every mutation
    pub total_amount: Decimal,
    pub payment_status: String,
    pub status: String,
    pub cancel_reason: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payment,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        Ok(self)
    }
}

impl Model {
    pub fn is_terminal(&self) -> bool {
        self.status == status::CLOSED || self.status == status::CANCELLED
    }
}
