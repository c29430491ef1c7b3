use crate::auth::entitlement::EntitlementGate;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;
use std::sync::Arc;
use std::time::Duration;

pub mod idempotency;
pub mod inventory;
pub mod invoicing;
pub mod orders;
pub mod stocktakes;

pub use idempotency::IdempotencyService;
pub use inventory::InventoryService;
pub use invoicing::InvoicingService;
pub use orders::OrderService;
pub use stocktakes::StocktakeService;

/// Bundle of service instances shared across handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: OrderService,
    pub idempotency: IdempotencyService,
    pub inventory: InventoryService,
    pub stocktakes: StocktakeService,
    pub gate: Arc<EntitlementGate>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Result<Self, ServiceError> {
        let gate = Arc::new(EntitlementGate::new(db.clone()));

        let invoicing = Arc::new(InvoicingService::new(
            config.invoicing_url.clone(),
            Duration::from_secs(config.invoicing_timeout_secs),
        )?);

        let orders = OrderService::new(
            db.clone(),
            gate.clone(),
            event_sender.clone(),
            Some(invoicing),
        );
        let idempotency = IdempotencyService::new(
            db.clone(),
            orders.clone(),
            gate.clone(),
            event_sender.clone(),
            config.idempotency_ttl_hours,
        );
        let inventory = InventoryService::new(db.clone(), gate.clone(), event_sender.clone());
        let stocktakes = StocktakeService::new(db, gate.clone(), event_sender);

        Ok(Self {
            orders,
            idempotency,
            inventory,
            stocktakes,
            gate,
        })
    }
}
