pub mod inventory;
pub mod orders;
pub mod realtime;
pub mod stocktakes;
