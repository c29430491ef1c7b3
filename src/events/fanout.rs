use crate::events::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Wire frame delivered to realtime subscribers.
///
/// `branch_id` is `None` for system-wide frames, which reach every
/// subscriber regardless of entitlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub branch_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn from_event(event: &Event) -> Self {
        Self {
            event: event.name().to_string(),
            branch_id: Some(event.branch_id()),
            payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            emitted_at: Utc::now(),
        }
    }
}

/// Fan-out hub for realtime delivery.
///
/// Delivery is at-most-once: subscribers that lag past the channel
/// capacity drop frames rather than stalling producers, and clients are
/// expected to refetch on reconnect.
#[derive(Debug)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers. A zero receiver
    /// count is normal and not an error.
    pub fn publish(&self, event: &Event) {
        let envelope = EventEnvelope::from_event(event);
        let delivered = self.tx.send(envelope).unwrap_or(0);
        debug!(
            event = event.name(),
            branch_id = %event.branch_id(),
            subscribers = delivered,
            "Broadcast event"
        );
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
