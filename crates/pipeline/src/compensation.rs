//! Returning reserved funds after a failed generation.
//!
//! A refund that cannot be written is a stuck charge: the user paid for
//! nothing. It is retried a few times, then logged under the
//! `lumora::stuck_charge` target and published as
//! `credits.compensation_failed` for the operator alert service.

use std::time::Duration;

use lumora_core::ledger::{CompensationOutcome, Reservation};
use lumora_core::store::LedgerStore;
use lumora_core::types::DbId;
use lumora_events::{event_types, DomainEvent, EventBus};
use lumora_provider::retry::{next_delay, RetryConfig};

/// Retry policy for ledger compensation writes.
pub fn compensation_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(5),
        multiplier: 2.0,
        jitter: 0.0,
    }
}

/// Compensate `reservation`, retrying storage failures.
///
/// Returns `None` only when every attempt failed; the stuck charge has been
/// logged and published by then.
pub async fn compensate_reservation(
    ledger: &dyn LedgerStore,
    events: &EventBus,
    reservation: &Reservation,
    job_id: Option<DbId>,
    reason: &str,
) -> Option<CompensationOutcome> {
    let retry = compensation_retry();
    let mut delay = retry.initial_delay;
    let mut attempt = 0u32;

    let last_error = loop {
        attempt += 1;
        match ledger.compensate(reservation, reason).await {
            Ok(outcome) => {
                report(events, reservation, job_id, outcome);
                return Some(outcome);
            }
            Err(e) if attempt <= retry.max_retries => {
                tracing::warn!(
                    job_id = ?job_id,
                    user_id = reservation.user_id,
                    reservation_id = %reservation.id,
                    attempt,
                    error = %e,
                    "Compensation failed, retrying",
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, &retry);
            }
            Err(e) => break e,
        }
    };

    tracing::error!(
        target: "lumora::stuck_charge",
        job_id = ?job_id,
        user_id = reservation.user_id,
        reservation_id = %reservation.id,
        is_free = reservation.is_free,
        credits = reservation.charged(),
        attempts = attempt,
        error = %last_error,
        "Compensation could not be written; funds remain charged",
    );
    let mut event = DomainEvent::new(event_types::CREDITS_COMPENSATION_FAILED)
        .with_user(reservation.user_id)
        .with_payload(serde_json::json!({
            "reservationId": reservation.id,
            "isFree": reservation.is_free,
            "credits": reservation.charged(),
            "reason": reason,
            "error": last_error.to_string(),
        }));
    if let Some(job_id) = job_id {
        event = event.with_job(job_id);
    }
    events.publish(event);
    None
}

fn report(
    events: &EventBus,
    reservation: &Reservation,
    job_id: Option<DbId>,
    outcome: CompensationOutcome,
) {
    match outcome {
        CompensationOutcome::Restored {
            credits_restored,
            free_generation_restored,
        } => {
            tracing::info!(
                job_id = ?job_id,
                user_id = reservation.user_id,
                reservation_id = %reservation.id,
                credits_restored,
                free_generation_restored,
                "Reservation compensated",
            );
            let mut event = DomainEvent::new(event_types::CREDITS_REFUNDED)
                .with_user(reservation.user_id)
                .with_payload(serde_json::json!({
                    "reservationId": reservation.id,
                    "creditsRestored": credits_restored,
                    "freeGenerationRestored": free_generation_restored,
                }));
            if let Some(job_id) = job_id {
                event = event.with_job(job_id);
            }
            events.publish(event);
        }
        CompensationOutcome::AlreadyCompensated => {
            tracing::debug!(
                job_id = ?job_id,
                reservation_id = %reservation.id,
                "Reservation was already compensated",
            );
        }
        CompensationOutcome::NotCommitted => {
            tracing::warn!(
                job_id = ?job_id,
                reservation_id = %reservation.id,
                "Compensation requested for a reservation that was never committed",
            );
        }
    }
}
