//! Lumora domain core.
//!
//! Pure, storage-agnostic building blocks shared by every other crate:
//! request validation and pricing, the generation job state machine, the
//! credit ledger rules, model catalog eligibility, media delivery helpers,
//! rate limiting, and the store traits the orchestrator is written against.

pub mod catalog;
pub mod delivery;
pub mod error;
pub mod generation;
pub mod job;
pub mod ledger;
pub mod rate_limit;
pub mod roles;
pub mod status;
pub mod store;
pub mod types;
