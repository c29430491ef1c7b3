pub mod branch_grant;
pub mod dining_table;
pub mod idempotency_key;
pub mod inventory_transaction;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod stocktake;
pub mod stocktake_item;
