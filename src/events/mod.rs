use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

pub mod fanout;

pub use fanout::{EventBroadcaster, EventEnvelope};

/// Domain events emitted by the services.
///
/// Events are sent only after their originating transaction commits, so
/// a consumer never observes an event for state that was rolled back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    OrderCreated { order_id: Uuid, branch_id: Uuid },
    OrderUpdated { order_id: Uuid, branch_id: Uuid },
    OrderCancelled { order_id: Uuid, branch_id: Uuid },
    OrderClosed { order_id: Uuid, branch_id: Uuid },
    PaymentRecorded { order_id: Uuid, branch_id: Uuid },
    TableUpdated { table_id: Uuid, branch_id: Uuid },
    InventoryRecorded { branch_id: Uuid, count: usize },
    StocktakeCreated { stocktake_id: Uuid, branch_id: Uuid },
    StocktakeApproved { stocktake_id: Uuid, branch_id: Uuid },
}

impl Event {
    /// Branch the event is scoped to; drives realtime fanout.
    pub fn branch_id(&self) -> Uuid {
        match self {
            Event::OrderCreated { branch_id, .. }
            | Event::OrderUpdated { branch_id, .. }
            | Event::OrderCancelled { branch_id, .. }
            | Event::OrderClosed { branch_id, .. }
            | Event::PaymentRecorded { branch_id, .. }
            | Event::TableUpdated { branch_id, .. }
            | Event::InventoryRecorded { branch_id, .. }
            | Event::StocktakeCreated { branch_id, .. }
            | Event::StocktakeApproved { branch_id, .. } => *branch_id,
        }
    }

    /// Stable event name for wire payloads.
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order.created",
            Event::OrderUpdated { .. } => "order.updated",
            Event::OrderCancelled { .. } => "order.cancelled",
            Event::OrderClosed { .. } => "order.closed",
            Event::PaymentRecorded { .. } => "payment.recorded",
            Event::TableUpdated { .. } => "table.updated",
            Event::InventoryRecorded { .. } => "inventory.recorded",
            Event::StocktakeCreated { .. } => "stocktake.created",
            Event::StocktakeApproved { .. } => "stocktake.approved",
        }
    }
}

/// Cloneable handle for emitting events from services.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Send an event; failures are logged, never propagated to the
    /// caller, since the originating transaction is already committed.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            error!("Failed to send event to processor: {}", e);
        }
    }
}

/// Create an event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, forwarding each event to the realtime
/// broadcaster when one is attached. Runs until the channel closes.
pub async fn process_events(
    mut rx: mpsc::Receiver<Event>,
    broadcaster: Option<Arc<EventBroadcaster>>,
) {
    info!("Event processor started");
    while let Some(event) = rx.recv().await {
        debug!(event = event.name(), branch_id = %event.branch_id(), "Processing event");
        if let Some(broadcaster) = &broadcaster {
            broadcaster.publish(&event);
        }
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_events_to_broadcaster() {
        let branch_id = Uuid::new_v4();
        let broadcaster = Arc::new(EventBroadcaster::new(8));
        let mut sub = broadcaster.subscribe();

        let (sender, rx) = event_channel(8);
        let processor = tokio::spawn(process_events(rx, Some(broadcaster.clone())));

        sender
            .send(Event::OrderCreated {
                order_id: Uuid::new_v4(),
                branch_id,
            })
            .await;

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.event, "order.created");
        assert_eq!(envelope.branch_id, Some(branch_id));

        drop(sender);
        processor.await.unwrap();
    }

    #[test]
    fn every_event_names_a_branch() {
        let branch_id = Uuid::new_v4();
        let event = Event::InventoryRecorded {
            branch_id,
            count: 3,
        };
        assert_eq!(event.branch_id(), branch_id);
        assert_eq!(event.name(), "inventory.recorded");
    }
}
