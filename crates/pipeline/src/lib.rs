//! Generation orchestration.
//!
//! [`Orchestrator`] reserves funds, creates the job record, and drives the
//! provider on a tracked background task. Every failure after the
//! reservation is committed ends in exactly one compensation attempt
//! sequence; a compensation that cannot be written is escalated as a stuck
//! charge. [`media::MediaResolver`] answers "where are this job's bytes".

pub mod compensation;
pub mod config;
pub mod media;
pub mod memory;
pub mod orchestrator;
pub mod progress;
pub mod recovery;

pub use config::PipelineConfig;
pub use media::{MediaCache, MediaResolver, MediaSource};
pub use memory::InMemoryStore;
pub use orchestrator::{GenerationTicket, Orchestrator, Stores};
pub use recovery::RecoverySweeper;
