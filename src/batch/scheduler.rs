//! Fair admission of batch member jobs under global and per-batch ceilings

use crate::config::SchedulerConfig;
use crate::jobs::{JobDispatcher, JobEvent, JobEventReceiver, JobLifecycle};
use crate::state::{BatchStatus, JobPhase, JobStatus};
use crate::storage::{lock, BatchCounts, BatchRecord, Storage, StorageError};
use crate::{ControlError, ControlResult};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Failure reason given to member jobs of a cancelled batch
pub const CANCELLED_REASON: &str = "cancelled";

/// Creates batches, drives their state machine and admits their jobs
pub struct BatchScheduler<S: Storage> {
    lifecycle: Arc<JobLifecycle<S>>,
    dispatcher: Arc<dyn JobDispatcher>,
    config: SchedulerConfig,
    /// Serializes admission decisions made by this scheduler
    admission: Mutex<()>,
}

fn batch_error(e: StorageError) -> ControlError {
    match e {
        StorageError::BatchNotFound(id) => ControlError::NotFound { kind: "batch", id },
        StorageError::JobNotFound(id) => ControlError::NotFound {
            kind: "job",
            id: id.to_string(),
        },
        other => ControlError::Storage(other),
    }
}

impl<S: Storage> BatchScheduler<S> {
    /// Creates a scheduler
    ///
    /// # Arguments
    ///
    /// * `lifecycle` - Job state machine; admitted jobs are owned by its worker ID
    /// * `dispatcher` - Receives every admitted job at phase `crawling`
    /// * `config` - Global ceiling and loop interval
    pub fn new(
        lifecycle: Arc<JobLifecycle<S>>,
        dispatcher: Arc<dyn JobDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            lifecycle,
            dispatcher,
            config,
            admission: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn admission(&self) -> MutexGuard<'_, ()> {
        self.admission.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn invalid(batch: &BatchRecord, action: &'static str) -> ControlError {
        ControlError::InvalidState {
            kind: "batch",
            id: batch.id.clone(),
            action,
            state: batch.status.to_string(),
        }
    }

    // ===== Batch control =====

    /// Groups existing jobs into a new pending batch
    ///
    /// # Returns
    ///
    /// The new batch ID
    pub fn create_batch(
        &self,
        name: &str,
        job_ids: &[i64],
        priority: i32,
        max_concurrent: u32,
    ) -> ControlResult<String> {
        for &job_id in job_ids {
            self.lifecycle.get_job(job_id)?;
        }

        let batch = BatchRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: BatchStatus::Pending,
            priority,
            max_concurrent: max_concurrent.max(1),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            counts: BatchCounts::default(),
            tokens_used: 0,
            cost_usd: 0.0,
        };

        {
            let mut storage = lock(self.lifecycle.storage());
            storage.insert_batch(&batch).map_err(batch_error)?;
            storage
                .assign_jobs_to_batch(job_ids, &batch.id)
                .map_err(batch_error)?;
        }
        self.refresh_counts(&batch.id)?;

        info!(
            "Created batch {} ({}) with {} jobs, priority {}",
            batch.id,
            name,
            job_ids.len(),
            priority
        );
        Ok(batch.id)
    }

    pub fn get_batch(&self, batch_id: &str) -> ControlResult<BatchRecord> {
        lock(self.lifecycle.storage())
            .get_batch(batch_id)
            .map_err(batch_error)
    }

    /// Moves a batch between states, rejecting anything outside `from`
    fn transition(
        &self,
        batch_id: &str,
        from: &[BatchStatus],
        to: BatchStatus,
        action: &'static str,
    ) -> ControlResult<BatchRecord> {
        let mut storage = lock(self.lifecycle.storage());
        let mut batch = storage.get_batch(batch_id).map_err(batch_error)?;
        if !from.contains(&batch.status) || !batch.status.can_transition_to(to) {
            return Err(Self::invalid(&batch, action));
        }

        let now = Utc::now();
        match to {
            BatchStatus::Processing if batch.started_at.is_none() => batch.started_at = Some(now),
            BatchStatus::Completed | BatchStatus::Cancelled => batch.completed_at = Some(now),
            _ => {}
        }
        info!("Batch {}: {} -> {}", batch_id, batch.status, to);
        batch.status = to;
        storage.update_batch(&batch).map_err(batch_error)?;
        Ok(batch)
    }

    /// Moves a pending batch to processing without admitting anything yet
    ///
    /// Its jobs are picked up by the next scheduling round.
    pub fn open(&self, batch_id: &str) -> ControlResult<BatchRecord> {
        self.transition(batch_id, &[BatchStatus::Pending], BatchStatus::Processing, "start")
    }

    /// Starts admitting jobs of a pending batch
    pub fn start(&self, batch_id: &str) -> ControlResult<BatchRecord> {
        self.open(batch_id)?;
        self.schedule_next_round()?;
        self.refresh_counts(batch_id)
    }

    /// Stops admitting new jobs; jobs already running continue
    pub fn pause(&self, batch_id: &str) -> ControlResult<BatchRecord> {
        self.transition(batch_id, &[BatchStatus::Processing], BatchStatus::Paused, "pause")
    }

    pub fn resume(&self, batch_id: &str) -> ControlResult<BatchRecord> {
        self.transition(batch_id, &[BatchStatus::Paused], BatchStatus::Processing, "resume")?;
        self.schedule_next_round()?;
        self.refresh_counts(batch_id)
    }

    /// Cancels a batch and fails every member job that has not finished
    ///
    /// Completed members keep their results. Jobs of other batches are untouched.
    pub fn cancel(&self, batch_id: &str) -> ControlResult<BatchRecord> {
        self.transition(
            batch_id,
            &[BatchStatus::Pending, BatchStatus::Processing, BatchStatus::Paused],
            BatchStatus::Cancelled,
            "cancel",
        )?;

        let members = lock(self.lifecycle.storage())
            .list_batch_jobs(batch_id)
            .map_err(batch_error)?;
        let mut cancelled = 0;
        for job in members.iter().filter(|job| !job.status.is_terminal()) {
            match self.lifecycle.fail(job.id, CANCELLED_REASON) {
                Ok(_) => cancelled += 1,
                Err(e) => debug!("Job {} finished before cancellation: {}", job.id, e),
            }
        }
        info!("Cancelled batch {}: {} jobs failed", batch_id, cancelled);

        self.refresh_counts(batch_id)
    }

    /// Deletes a batch; its jobs are kept without a batch
    pub fn delete(&self, batch_id: &str) -> ControlResult<()> {
        lock(self.lifecycle.storage())
            .delete_batch(batch_id)
            .map_err(batch_error)?;
        info!("Deleted batch {}", batch_id);
        Ok(())
    }

    /// Current per-status counts of a batch's jobs
    pub fn progress(&self, batch_id: &str) -> ControlResult<BatchCounts> {
        Ok(self.refresh_counts(batch_id)?.counts)
    }

    /// Member jobs of a batch that have not started yet
    pub fn pending_jobs(&self, batch_id: &str) -> ControlResult<Vec<i64>> {
        let members = lock(self.lifecycle.storage())
            .list_batch_jobs(batch_id)
            .map_err(batch_error)?;
        Ok(members
            .into_iter()
            .filter(|job| job.status == JobStatus::Pending)
            .map(|job| job.id)
            .collect())
    }

    /// Recomputes counts and usage totals from the member jobs
    ///
    /// A processing batch whose members are all terminal becomes `completed`,
    /// whether or not any of them succeeded.
    pub fn refresh_counts(&self, batch_id: &str) -> ControlResult<BatchRecord> {
        let mut storage = lock(self.lifecycle.storage());
        let mut batch = storage.get_batch(batch_id).map_err(batch_error)?;
        let members = storage.list_batch_jobs(batch_id).map_err(batch_error)?;

        batch.counts = BatchCounts::from_jobs(&members);
        batch.tokens_used = members.iter().map(|job| job.tokens_used).sum();
        batch.cost_usd = members.iter().map(|job| job.cost_usd).sum();

        if batch.status == BatchStatus::Processing && batch.counts.all_terminal() {
            batch.status = BatchStatus::Completed;
            batch.completed_at = Some(Utc::now());
            info!(
                "Batch {} completed: {} succeeded, {} failed",
                batch_id, batch.counts.completed, batch.counts.failed
            );
        }

        storage.update_batch(&batch).map_err(batch_error)?;
        Ok(batch)
    }

    // ===== Admission =====

    /// Admits the batch's oldest pending job if both ceilings allow it
    fn admit_one(&self, batch: &BatchRecord) -> ControlResult<bool> {
        let admitted = {
            let mut storage = lock(self.lifecycle.storage());
            let Some(job) = storage.oldest_pending_job(&batch.id).map_err(batch_error)? else {
                return Ok(false);
            };
            if storage.count_in_progress(Some(&batch.id))? >= batch.max_concurrent {
                return Ok(false);
            }
            if !storage.try_admit_job(
                job.id,
                self.lifecycle.worker_id(),
                self.config.global_concurrency,
                batch.max_concurrent,
            )? {
                return Ok(false);
            }
            storage.get_job(job.id)?
        };

        debug!("Admitted job {} from batch {}", admitted.id, batch.id);
        self.dispatcher.dispatch(admitted, JobPhase::Crawling);
        Ok(true)
    }

    /// Runs fair admission rounds across processing batches
    ///
    /// Batches are visited in `(priority, created_at)` order, one admission per batch
    /// per round, until the global ceiling is reached or a round admits nothing.
    ///
    /// # Returns
    ///
    /// The number of jobs admitted
    pub fn schedule_next_round(&self) -> ControlResult<u32> {
        let _admission = self.admission();
        self.schedule_locked()
    }

    fn schedule_locked(&self) -> ControlResult<u32> {
        let (mut available, mut batches) = {
            let storage = lock(self.lifecycle.storage());
            let running = storage.count_in_progress(None)?;
            let available = self.config.global_concurrency.saturating_sub(running);
            if available == 0 {
                return Ok(0);
            }
            let batches = storage
                .list_batches_by_status(BatchStatus::Processing)
                .map_err(batch_error)?;
            (available, batches)
        };

        let mut admitted = 0;
        let mut touched: Vec<String> = Vec::new();
        while available > 0 && !batches.is_empty() {
            let mut admitted_this_round = 0;
            let mut remaining = Vec::with_capacity(batches.len());

            for batch in batches {
                if available == 0 {
                    break;
                }
                if !self.admit_one(&batch)? {
                    continue;
                }
                available -= 1;
                admitted_this_round += 1;
                if !touched.contains(&batch.id) {
                    touched.push(batch.id.clone());
                }
                remaining.push(batch);
            }

            if admitted_this_round == 0 {
                break;
            }
            admitted += admitted_this_round;
            batches = remaining;
        }

        for batch_id in &touched {
            self.refresh_counts(batch_id)?;
        }
        if admitted > 0 {
            info!("Scheduling round admitted {} jobs", admitted);
        }
        Ok(admitted)
    }

    /// Reacts to a finished job: refreshes its batch and backfills the freed slot
    ///
    /// # Returns
    ///
    /// The number of jobs admitted
    pub fn handle_event(&self, event: &JobEvent) -> ControlResult<u32> {
        let JobEvent::Finished {
            job_id,
            batch_id,
            status,
        } = event;
        debug!("Job {} finished as {}", job_id, status);

        let _admission = self.admission();
        if let Some(batch_id) = batch_id {
            let batch = match self.refresh_counts(batch_id) {
                Ok(batch) => batch,
                Err(ControlError::NotFound { .. }) => return self.schedule_locked(),
                Err(e) => return Err(e),
            };
            if batch.status == BatchStatus::Processing && self.admit_one(&batch)? {
                self.refresh_counts(batch_id)?;
                return Ok(1);
            }
        }
        self.schedule_locked()
    }

    /// True while any batch is processing or any job is still running
    pub fn has_unfinished_work(&self) -> ControlResult<bool> {
        let storage = lock(self.lifecycle.storage());
        if storage.count_in_progress(None)? > 0 {
            return Ok(true);
        }
        let processing = storage
            .list_batches_by_status(BatchStatus::Processing)
            .map_err(batch_error)?;
        Ok(!processing.is_empty())
    }

    fn tick(&self) {
        match self.lifecycle.check_timeouts() {
            Ok(timed_out) if !timed_out.is_empty() => {
                info!("Timed out {} jobs", timed_out.len());
            }
            Ok(_) => {}
            Err(e) => warn!("Timeout check failed: {}", e),
        }
        if let Err(e) = self.schedule_next_round() {
            warn!("Scheduling round failed: {}", e);
        }
    }

    /// Scheduler loop
    ///
    /// Runs a round (after applying timeouts) every poll interval and the completion
    /// cascade for every job event. Returns when the event channel closes or
    /// `shutdown` becomes true.
    pub async fn run(&self, mut events: JobEventReceiver, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Scheduler running: global concurrency {}, poll every {}s",
            self.config.global_concurrency, self.config.poll_interval_secs
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(&event) {
                            warn!("Failed to handle event for job {}: {}", event.job_id(), e);
                        }
                    }
                    None => {
                        info!("Job event channel closed, scheduler stopping");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}
