//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the API handlers and
//! the generation pipeline.

use chrono::{DateTime, Utc};
use lumora_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event names published on the bus.
pub mod event_types {
    pub const GENERATION_COMPLETED: &str = "generation.completed";
    pub const GENERATION_FAILED: &str = "generation.failed";
    pub const CREDITS_REFUNDED: &str = "credits.refunded";
    pub const CREDITS_GRANTED: &str = "credits.granted";
    pub const CREDITS_REVOKED: &str = "credits.revoked";
    /// A failed generation whose refund could not be written. Needs an operator.
    pub const CREDITS_COMPENSATION_FAILED: &str = "credits.compensation_failed";
}

// ---------------------------------------------------------------------------
// DomainEvent
// ---------------------------------------------------------------------------

/// Something that happened to a job or a balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Dot-separated event name, one of [`event_types`].
    pub event_type: String,

    /// Generation job the event concerns, if any.
    pub job_id: Option<DbId>,

    /// Owner of the job or balance.
    pub user_id: Option<DbId>,

    /// Event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            job_id: None,
            user_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: DbId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_user(mut self, user_id: DbId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use lumora_events::bus::{event_types, DomainEvent, EventBus};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(DomainEvent::new(event_types::GENERATION_COMPLETED).with_job(1));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            DomainEvent::new(event_types::CREDITS_REFUNDED)
                .with_job(42)
                .with_user(7)
                .with_payload(serde_json::json!({"credits": 8})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "credits.refunded");
        assert_eq!(received.job_id, Some(42));
        assert_eq!(received.user_id, Some(7));
        assert_eq!(received.payload["credits"], 8);
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(DomainEvent::new(event_types::GENERATION_FAILED));

        assert_eq!(rx1.recv().await.unwrap().event_type, "generation.failed");
        assert_eq!(rx2.recv().await.unwrap().event_type, "generation.failed");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        EventBus::default().publish(DomainEvent::new(event_types::GENERATION_COMPLETED));
    }
}
