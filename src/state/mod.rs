//! State module for politeness and job/batch state machines
//!
//! # Components
//!
//! - `DomainState`: per-domain token bucket and in-flight flag used by the rate limiter
//! - `JobStatus` / `JobPhase`: status and pipeline phase of a company job
//! - `BatchStatus`: status of a batch of company jobs

mod batch_state;
mod domain_state;
mod job_state;

// Re-export main types
pub use batch_state::BatchStatus;
pub use domain_state::DomainState;
pub use job_state::{JobPhase, JobStatus};
