//! Storage module for persisting jobs, batches and crawl results
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Job and batch records with their status state machines
//! - Checkpoint persistence (one JSON document per job)
//! - Crawled page results
//! - Short-lived leases used as the pause/resume lock

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{BatchStatus, JobPhase, JobStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage shared between the scheduler, the lifecycle and running jobs
pub type SharedStorage<S> = Arc<Mutex<S>>;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Wraps a backend for sharing
pub fn share<S: Storage>(storage: S) -> SharedStorage<S> {
    Arc::new(Mutex::new(storage))
}

/// Locks shared storage, recovering from a poisoned mutex
pub fn lock<S>(storage: &Mutex<S>) -> MutexGuard<'_, S> {
    storage.lock().unwrap_or_else(|e| e.into_inner())
}

/// Formats a timestamp as fixed-width RFC 3339 (lexical order is chronological)
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp
pub fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp {:?}: {}", s, e)))
}

/// One company's pipeline instance
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub company_name: String,
    pub website: String,
    pub batch_id: Option<String>,
    pub status: JobStatus,
    pub phase: JobPhase,
    /// Process currently responsible for running the job
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Non-null iff status is paused
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Sum of all completed pauses
    pub paused_duration_ms: i64,
    pub failure_reason: Option<String>,
    pub pages_crawled: u32,
    pub entities_extracted: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// A named group of company jobs
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    /// UUID
    pub id: String,
    pub name: String,
    pub status: BatchStatus,
    /// Lower runs first
    pub priority: i32,
    /// Per-batch in-progress ceiling
    pub max_concurrent: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counts: BatchCounts,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

/// Per-status member counts of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub total: u32,
    pub pending: u32,
    pub in_progress: u32,
    pub paused: u32,
    pub completed: u32,
    pub failed: u32,
}

impl BatchCounts {
    /// Tallies member jobs
    pub fn from_jobs(jobs: &[JobRecord]) -> Self {
        let mut counts = Self {
            total: jobs.len() as u32,
            ..Default::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::InProgress => counts.in_progress += 1,
                JobStatus::Paused => counts.paused += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Jobs in a terminal state
    pub fn finished(&self) -> u32 {
        self.completed + self.failed
    }

    /// `(completed + failed) / total` as a percentage
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        f64::from(self.finished()) * 100.0 / f64::from(self.total)
    }

    pub fn all_terminal(&self) -> bool {
        self.finished() == self.total
    }
}
