//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod ai_model_repo;
pub mod credit_repo;
pub mod generation_job_repo;

pub use ai_model_repo::AiModelRepo;
pub use credit_repo::CreditRepo;
pub use generation_job_repo::GenerationJobRepo;
