//! Domain events and operational alerting.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`DomainEvent`]: the event envelope published by the generation
//!   pipeline and the ledger handlers.
//! - [`OpsAlertService`]: background subscriber that escalates stuck
//!   charges to an operator mailbox.

pub mod alerts;
pub mod bus;
pub mod delivery;

pub use alerts::{AlertNotifier, OpsAlertService};
pub use bus::{event_types, DomainEvent, EventBus};
pub use delivery::email::{EmailConfig, EmailDelivery};
