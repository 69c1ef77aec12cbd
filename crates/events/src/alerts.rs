//! Escalation of stuck charges.
//!
//! [`OpsAlertService`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! and forwards every `credits.compensation_failed` event to an
//! [`AlertNotifier`]. It runs as a long-lived background task and stops
//! when the bus is dropped.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::bus::{event_types, DomainEvent};

/// Destination for operator alerts.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, event: &DomainEvent) -> Result<(), String>;
}

pub struct OpsAlertService;

impl OpsAlertService {
    /// Event types that page an operator.
    pub fn is_alert(event: &DomainEvent) -> bool {
        event.event_type == event_types::CREDITS_COMPENSATION_FAILED
    }

    pub async fn run(
        notifier: std::sync::Arc<dyn AlertNotifier>,
        mut receiver: broadcast::Receiver<DomainEvent>,
    ) {
        loop {
            match receiver.recv().await {
                Ok(event) if Self::is_alert(&event) => {
                    if let Err(e) = notifier.notify(&event).await {
                        tracing::error!(
                            error = %e,
                            event_type = %event.event_type,
                            job_id = ?event.job_id,
                            "Failed to deliver operator alert"
                        );
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Alert service lagged, some events were skipped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, alert service shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bus::EventBus;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl AlertNotifier for Recorder {
        async fn notify(&self, event: &DomainEvent) -> Result<(), String> {
            self.0.lock().unwrap().push(event.event_type.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn forwards_only_compensation_failures() {
        let bus = EventBus::default();
        let recorder = Arc::new(Recorder::default());
        let rx = bus.subscribe();

        bus.publish(DomainEvent::new(event_types::GENERATION_FAILED).with_job(1));
        bus.publish(DomainEvent::new(event_types::CREDITS_COMPENSATION_FAILED).with_job(1));
        drop(bus);

        OpsAlertService::run(recorder.clone(), rx).await;

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["credits.compensation_failed".to_string()]
        );
    }
}
