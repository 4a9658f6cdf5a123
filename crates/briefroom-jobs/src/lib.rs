//! # briefroom-jobs
//!
//! Time-boxed ingestion job execution.
//!
//! A job is never processed in the background. Each call to
//! [`JobScheduler::run_job`] takes the job's run lock, advances its documents
//! for at most one time budget, persists where every document stopped, and
//! returns. Callers keep calling `run` until the job is terminal.
//!
//! - [`JobScheduler`]: create, run and cancel jobs
//! - [`StepExecutor`]: the per-document state machine of one slice
//! - [`StatusReporter`]: status snapshots and the event tail
//! - [`RunConfig`]: slice limits

pub mod config;
pub mod executor;
pub mod reporter;
pub mod scheduler;

pub use config::{max_time_budget, RunConfig};
pub use executor::{DocumentOutcome, StepExecutor, OPERATION_INCOMPLETE};
pub use reporter::StatusReporter;
pub use scheduler::{JobScheduler, CANCELLED_BY_OPERATOR, STORE_NOT_FOUND};

// Re-export core types for convenience
pub use briefroom_core::{
    DocumentState, Error, EventLevel, EventMessage, IngestionJob, JobEvent, JobStatus,
    JobStatusView, Result,
};
