//! Resumable job checkpoints
//!
//! This module handles:
//! - The versioned checkpoint record and its resume rules
//! - Field-by-field validation and repair of stored checkpoints
//! - Persisting checkpoints per job

mod repair;
mod store;
mod types;

pub use repair::{parse_checkpoint, validate_and_repair};
pub use store::CheckpointStore;
pub use types::{Checkpoint, ProgressCounters, CHECKPOINT_VERSION};
