//! Job module: the per-company job state machine and its execution
//!
//! - `JobLifecycle`: status transitions, pause/resume/timeout, crash recovery
//! - `LiveJobs`: job tasks running in this process and their live crawl state
//! - `PipelineRunner`: runs dispatched jobs through crawl, extract, analyze and generate
//! - `JobEvent`: terminal-state notifications for the batch scheduler

mod events;
mod lifecycle;
mod registry;
mod runner;

pub use events::{job_events, JobEvent, JobEventReceiver, JobEventSender};
pub use lifecycle::{
    elapsed_active_time, JobLifecycle, RecoveryReport, STALE_REASON, TIMEOUT_REASON,
};
pub use registry::{LiveJobs, LiveRegistration};
pub use runner::{CrawlOnlyStages, JobDispatcher, PipelineRunner, PipelineStages, StageUsage};
