//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::crawler::CrawledPage;
use crate::state::{BatchStatus, JobStatus};
use crate::storage::{BatchRecord, JobRecord};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all persistence needed by the job lifecycle, the batch
/// scheduler and the checkpoint store. Callers share a backend as
/// `Arc<Mutex<S>>`; each method is atomic on its own.
pub trait Storage: Send {
    // ===== Job Management =====

    /// Creates a pending job in phase `queued`
    ///
    /// # Returns
    ///
    /// The ID of the newly created job
    fn insert_job(
        &mut self,
        company_name: &str,
        website: &str,
        batch_id: Option<&str>,
    ) -> StorageResult<i64>;

    /// Gets a job by ID
    fn get_job(&self, job_id: i64) -> StorageResult<JobRecord>;

    /// Writes every mutable job column and bumps `updated_at`
    fn update_job(&mut self, job: &JobRecord) -> StorageResult<()>;

    /// Writes the lifecycle columns of a job if its stored status is one of `from`
    ///
    /// Status, phase, owner, timestamps, paused duration and failure reason
    /// are written in one conditional statement; progress and usage counters
    /// are left alone.
    ///
    /// # Returns
    ///
    /// * `true` - The row matched and was written
    /// * `false` - The job does not exist or its status was not in `from`
    fn transition_job(&mut self, job: &JobRecord, from: &[JobStatus]) -> StorageResult<bool>;

    /// Records crawl/extraction progress without touching status
    fn update_job_progress(
        &mut self,
        job_id: i64,
        pages_crawled: u32,
        entities_extracted: u64,
    ) -> StorageResult<()>;

    /// Adds LLM usage to a job's running totals
    fn add_job_usage(&mut self, job_id: i64, tokens: u64, cost_usd: f64) -> StorageResult<()>;

    /// Gets all jobs with a status, oldest first
    fn list_jobs_by_status(&self, status: JobStatus) -> StorageResult<Vec<JobRecord>>;

    /// Gets all member jobs of a batch, oldest first
    fn list_batch_jobs(&self, batch_id: &str) -> StorageResult<Vec<JobRecord>>;

    /// Puts existing jobs into a batch
    fn assign_jobs_to_batch(&mut self, job_ids: &[i64], batch_id: &str) -> StorageResult<()>;

    /// Counts in-progress jobs, globally or within one batch
    fn count_in_progress(&self, batch_id: Option<&str>) -> StorageResult<u32>;

    /// Gets the oldest pending job of a batch
    fn oldest_pending_job(&self, batch_id: &str) -> StorageResult<Option<JobRecord>>;

    /// Atomically admits a pending job if both ceilings allow it
    ///
    /// The status check and both in-progress counts are evaluated in the same
    /// statement that flips the job to `in_progress`.
    ///
    /// # Returns
    ///
    /// * `true` - The job is now in progress, owned by `worker_id`
    /// * `false` - The job was not pending or a ceiling was reached
    fn try_admit_job(
        &mut self,
        job_id: i64,
        worker_id: &str,
        global_cap: u32,
        batch_cap: u32,
    ) -> StorageResult<bool>;

    /// Transfers ownership of an in-progress job if it is still owned by `expected_owner`
    fn claim_job(
        &mut self,
        job_id: i64,
        expected_owner: Option<&str>,
        new_owner: &str,
    ) -> StorageResult<bool>;

    /// Counts jobs by status
    fn count_jobs_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>>;

    // ===== Batch Management =====

    fn insert_batch(&mut self, batch: &BatchRecord) -> StorageResult<()>;

    fn get_batch(&self, batch_id: &str) -> StorageResult<BatchRecord>;

    fn update_batch(&mut self, batch: &BatchRecord) -> StorageResult<()>;

    /// Gets batches with a status, ordered by priority then creation time
    fn list_batches_by_status(&self, status: BatchStatus) -> StorageResult<Vec<BatchRecord>>;

    /// Gets all batches, ordered by priority then creation time
    fn list_batches(&self) -> StorageResult<Vec<BatchRecord>>;

    /// Deletes a batch; member jobs are kept and detached
    fn delete_batch(&mut self, batch_id: &str) -> StorageResult<()>;

    // ===== Checkpoints =====

    /// Stores a job's checkpoint, replacing the previous one
    fn save_checkpoint(&mut self, job_id: i64, data: &str) -> StorageResult<()>;

    fn load_checkpoint(&self, job_id: i64) -> StorageResult<Option<String>>;

    fn delete_checkpoint(&mut self, job_id: i64) -> StorageResult<()>;

    // ===== Crawled Pages =====

    fn insert_page(&mut self, job_id: i64, page: &CrawledPage) -> StorageResult<()>;

    /// Gets a job's pages in crawl order
    fn list_pages(&self, job_id: i64) -> StorageResult<Vec<CrawledPage>>;

    fn count_pages(&self, job_id: i64) -> StorageResult<u64>;

    // ===== Leases =====

    /// Takes a lease unless a different owner holds an unexpired one
    ///
    /// Re-acquiring a lease already held by `owner` refreshes it.
    fn try_acquire_lease(&mut self, key: &str, owner: &str, ttl: Duration) -> StorageResult<bool>;

    /// Releases a lease held by `owner`
    fn release_lease(&mut self, key: &str, owner: &str) -> StorageResult<()>;
}
