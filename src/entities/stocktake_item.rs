use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One counted ingredient line. `system_qty` and `delta` are frozen at
/// creation time and never recomputed.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stocktake_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub stocktake_id: Uuid,
    pub ingredient_id: Uuid,
    pub system_qty: Decimal,
    pub actual_qty: Decimal,
    pub delta: Decimal,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stocktake::Entity",
        from = "Column::StocktakeId",
        to = "super::stocktake::Column::Id",
        on_delete = "Cascade"
    )]
    Stocktake,
}

impl Related<super::stocktake::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Stocktake.def()
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
