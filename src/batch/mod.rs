//! Batch module: groups of company jobs admitted fairly under concurrency ceilings
//!
//! - `BatchScheduler`: batch state machine, round-robin admission and the completion cascade
//! - `BatchScheduler::run`: the scheduler loop reacting to ticks and job events

mod scheduler;

pub use scheduler::{BatchScheduler, CANCELLED_REASON};
pub use crate::storage::{BatchCounts, BatchRecord};
