//! Row structs for the Lumora tables.
//!
//! Each struct derives `FromRow` and converts into the matching
//! `lumora_core` domain type, rejecting unknown status ids and labels.

pub mod ai_model;
pub mod credit;
pub mod generation_job;
