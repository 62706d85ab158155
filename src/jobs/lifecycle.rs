//! Job lifecycle: start, pause, resume, timeout and recovery
//!
//! Status transitions follow `JobStatus::can_transition_to`. Every write is
//! conditional on the status it was decided from, so of two racing
//! transitions only one lands. A rejected operation returns a
//! `ControlError` and leaves the stored job untouched.
//!
//! Pause and resume are arbitrated by a short-lived lease keyed by job ID;
//! whoever fails to take it gets `ControlError::LockHeld`.

use crate::checkpoint::CheckpointStore;
use crate::config::JobsConfig;
use crate::jobs::events::{JobEvent, JobEventSender};
use crate::jobs::registry::LiveJobs;
use crate::jobs::runner::JobDispatcher;
use crate::state::{JobPhase, JobStatus};
use crate::storage::{lock, JobRecord, SharedStorage, Storage, StorageError};
use crate::{ControlError, ControlResult};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Failure reason recorded when a job exceeds its active-time budget
pub const TIMEOUT_REASON: &str = "timeout";

/// Failure reason recorded when recovery finds an abandoned job
pub const STALE_REASON: &str = "stale";

/// What a recovery pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// Jobs claimed and dispatched, with the phase they continue from
    pub resumed: Vec<(i64, JobPhase)>,
    /// Jobs marked failed as stale
    pub failed: Vec<i64>,
    /// Jobs already owned by this worker or claimed by another one meanwhile
    pub skipped: Vec<i64>,
}

/// Active time of a job: wall time since start minus time spent paused
///
/// For a paused job the clock stops at `paused_at`.
pub fn elapsed_active_time(job: &JobRecord, now: DateTime<Utc>) -> Duration {
    let Some(started_at) = job.started_at else {
        return Duration::zero();
    };

    let until = match job.status {
        JobStatus::Paused => job.paused_at.unwrap_or(now),
        JobStatus::Completed | JobStatus::Failed => job.completed_at.unwrap_or(now),
        _ => now,
    };

    let active = (until - started_at) - Duration::milliseconds(job.paused_duration_ms);
    active.max(Duration::zero())
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::weeks(52 * 100))
}

/// State machine over stored job records
pub struct JobLifecycle<S: Storage> {
    storage: SharedStorage<S>,
    checkpoints: CheckpointStore<S>,
    live: LiveJobs,
    config: JobsConfig,
    worker_id: String,
    events: Option<JobEventSender>,
}

impl<S: Storage> JobLifecycle<S> {
    /// Creates a lifecycle with a fresh random worker ID
    pub fn new(storage: SharedStorage<S>, config: JobsConfig) -> Self {
        Self {
            checkpoints: CheckpointStore::new(storage.clone()),
            storage,
            live: LiveJobs::new(),
            config,
            worker_id: uuid::Uuid::new_v4().to_string(),
            events: None,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Sends `JobEvent::Finished` on every terminal transition
    pub fn with_events(mut self, events: JobEventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn live(&self) -> &LiveJobs {
        &self.live
    }

    pub fn checkpoints(&self) -> &CheckpointStore<S> {
        &self.checkpoints
    }

    pub fn storage(&self) -> &SharedStorage<S> {
        &self.storage
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    // ===== Reads =====

    pub fn get_job(&self, job_id: i64) -> ControlResult<JobRecord> {
        lock(&self.storage).get_job(job_id).map_err(|e| match e {
            StorageError::JobNotFound(id) => ControlError::NotFound {
                kind: "job",
                id: id.to_string(),
            },
            other => ControlError::Storage(other),
        })
    }

    /// Active time of a stored job as of now
    pub fn elapsed_active(&self, job_id: i64) -> ControlResult<Duration> {
        Ok(elapsed_active_time(&self.get_job(job_id)?, Utc::now()))
    }

    fn invalid(job: &JobRecord, action: &'static str) -> ControlError {
        ControlError::InvalidState {
            kind: "job",
            id: job.id.to_string(),
            action,
            state: job.status.to_string(),
        }
    }

    fn require(job: &JobRecord, allowed: &[JobStatus], action: &'static str) -> ControlResult<()> {
        if allowed.contains(&job.status) {
            Ok(())
        } else {
            Err(Self::invalid(job, action))
        }
    }

    /// Writes a transition if the stored status is still one of `from`
    fn commit(
        &self,
        job: &JobRecord,
        from: &[JobStatus],
        action: &'static str,
    ) -> ControlResult<()> {
        if lock(&self.storage).transition_job(job, from)? {
            return Ok(());
        }
        Err(Self::invalid(&self.get_job(job.id)?, action))
    }

    fn notify_finished(&self, job: &JobRecord) {
        if let Some(events) = &self.events {
            let event = JobEvent::Finished {
                job_id: job.id,
                batch_id: job.batch_id.clone(),
                status: job.status,
            };
            if events.send(event).is_err() {
                debug!("No scheduler listening for job {} events", job.id);
            }
        }
    }

    // ===== Transitions =====

    /// Creates a pending job in phase `queued`
    pub fn create_job(&self, company_name: &str, website: &str) -> ControlResult<i64> {
        let job_id = lock(&self.storage).insert_job(company_name, website, None)?;
        info!("Created job {} for {} ({})", job_id, company_name, website);
        Ok(job_id)
    }

    /// Starts a pending job outside batch admission
    pub fn start(&self, job_id: i64) -> ControlResult<JobRecord> {
        let job = self.get_job(job_id)?;
        Self::require(&job, &[JobStatus::Pending], "start")?;

        let started = lock(&self.storage).try_admit_job(job_id, &self.worker_id, u32::MAX, u32::MAX)?;
        if !started {
            return Err(Self::invalid(&self.get_job(job_id)?, "start"));
        }
        info!("Started job {}", job_id);
        self.get_job(job_id)
    }

    /// Records the phase an in-progress job is executing
    pub fn enter_phase(&self, job_id: i64, phase: JobPhase) -> ControlResult<JobRecord> {
        let mut job = self.get_job(job_id)?;
        Self::require(&job, &[JobStatus::InProgress], "change phase of")?;
        if job.phase != phase {
            debug!("Job {} entering phase {}", job_id, phase);
            job.phase = phase;
            self.commit(&job, &[JobStatus::InProgress], "change phase of")?;
        }
        Ok(job)
    }

    /// Moves an in-progress job to its next phase
    pub fn advance_phase(&self, job_id: i64) -> ControlResult<JobPhase> {
        let job = self.get_job(job_id)?;
        Self::require(&job, &[JobStatus::InProgress], "advance")?;
        let next = job.phase.next().ok_or_else(|| Self::invalid(&job, "advance"))?;
        self.enter_phase(job_id, next)?;
        Ok(next)
    }

    /// Marks an in-progress job completed
    pub fn complete(&self, job_id: i64) -> ControlResult<JobRecord> {
        let mut job = self.get_job(job_id)?;
        Self::require(&job, &[JobStatus::InProgress], "complete")?;

        job.status = JobStatus::Completed;
        job.phase = JobPhase::Completed;
        job.completed_at = Some(Utc::now());
        self.commit(&job, &[JobStatus::InProgress], "complete")?;

        info!("Job {} completed", job_id);
        self.notify_finished(&job);
        Ok(job)
    }

    /// Marks a non-terminal job failed and stops its crawl loop if one is running
    pub fn fail(&self, job_id: i64, reason: &str) -> ControlResult<JobRecord> {
        let job = loop {
            let mut job = self.get_job(job_id)?;
            if job.status.is_terminal() {
                return Err(Self::invalid(&job, "fail"));
            }
            let seen = job.status;

            let now = Utc::now();
            if let Some(paused_at) = job.paused_at.take() {
                job.paused_duration_ms += (now - paused_at).num_milliseconds().max(0);
            }
            job.status = JobStatus::Failed;
            job.failure_reason = Some(reason.to_string());
            job.completed_at = Some(now);

            // Paused time is derived from the status read above
            if lock(&self.storage).transition_job(&job, &[seen])? {
                break job;
            }
            debug!("Job {} changed status while failing, retrying", job_id);
        };

        self.live.signal_stop(job_id);
        warn!("Job {} failed: {}", job_id, reason);
        self.notify_finished(&job);
        Ok(job)
    }

    /// Runs `f` while holding the job's lease
    fn with_lock<T>(
        &self,
        job_id: i64,
        worker_id: &str,
        f: impl FnOnce() -> ControlResult<T>,
    ) -> ControlResult<T> {
        let key = format!("job:{}", job_id);
        let acquired =
            lock(&self.storage).try_acquire_lease(&key, worker_id, self.config.lock_ttl())?;
        if !acquired {
            return Err(ControlError::LockHeld { key });
        }

        let result = f();

        if let Err(e) = lock(&self.storage).release_lease(&key, worker_id) {
            warn!("Failed to release {}: {}", key, e);
        }
        result
    }

    /// Saves a checkpoint of the running crawl as of its last fetched page
    fn save_live_checkpoint(&self, job_id: i64) {
        if let Some(checkpoint) = self.live.snapshot(job_id) {
            if let Err(e) = self.checkpoints.save(job_id, &checkpoint) {
                warn!("Failed to save checkpoint for job {}: {}", job_id, e);
            }
        }
    }

    /// Pauses an in-progress job
    ///
    /// The running crawl loop (if any) stops at its next iteration and emits
    /// its final checkpoint.
    pub fn pause(&self, job_id: i64, worker_id: &str) -> ControlResult<JobRecord> {
        let job = self.get_job(job_id)?;
        Self::require(&job, &[JobStatus::InProgress], "pause")?;

        self.with_lock(job_id, worker_id, || {
            let mut job = self.get_job(job_id)?;
            Self::require(&job, &[JobStatus::InProgress], "pause")?;

            self.save_live_checkpoint(job_id);

            job.status = JobStatus::Paused;
            job.paused_at = Some(Utc::now());
            self.commit(&job, &[JobStatus::InProgress], "pause")?;
            self.live.signal_pause(job_id);

            info!("Paused job {} in phase {}", job_id, job.phase);
            Ok(job)
        })
    }

    /// Resumes a paused job and dispatches it at its checkpoint's resume phase
    pub fn resume(
        &self,
        job_id: i64,
        worker_id: &str,
        dispatcher: &dyn JobDispatcher,
    ) -> ControlResult<JobPhase> {
        let job = self.get_job(job_id)?;
        Self::require(&job, &[JobStatus::Paused], "resume")?;

        let (job, phase) = self.with_lock(job_id, worker_id, || {
            let mut job = self.get_job(job_id)?;
            Self::require(&job, &[JobStatus::Paused], "resume")?;

            let now = Utc::now();
            if let Some(paused_at) = job.paused_at.take() {
                job.paused_duration_ms += (now - paused_at).num_milliseconds().max(0);
            }

            let phase = self.checkpoints.resume_phase(job_id)?;
            job.status = JobStatus::InProgress;
            job.phase = phase;
            job.worker_id = Some(worker_id.to_string());
            self.commit(&job, &[JobStatus::Paused], "resume")?;

            info!(
                "Resumed job {} at {} ({} ms paused in total)",
                job_id, phase, job.paused_duration_ms
            );
            Ok((job, phase))
        })?;

        dispatcher.dispatch(job, phase);
        Ok(phase)
    }

    /// Fails a job that ran out of active time, keeping its partial results
    pub fn timeout(&self, job_id: i64) -> ControlResult<JobRecord> {
        let job = self.get_job(job_id)?;
        Self::require(&job, &[JobStatus::InProgress, JobStatus::Paused], "time out")?;

        self.save_live_checkpoint(job_id);
        self.fail(job_id, TIMEOUT_REASON)
    }

    /// Times out every running or paused job over its active-time budget
    pub fn check_timeouts(&self) -> ControlResult<Vec<i64>> {
        let budget = to_chrono(self.config.timeout());
        let now = Utc::now();

        let mut candidates = {
            let storage = lock(&self.storage);
            let mut jobs = storage.list_jobs_by_status(JobStatus::InProgress)?;
            jobs.extend(storage.list_jobs_by_status(JobStatus::Paused)?);
            jobs
        };
        candidates.retain(|job| elapsed_active_time(job, now) >= budget);

        let mut timed_out = Vec::new();
        for job in candidates {
            match self.timeout(job.id) {
                Ok(_) => timed_out.push(job.id),
                Err(e) => debug!("Skipping timeout of job {}: {}", job.id, e),
            }
        }
        Ok(timed_out)
    }

    /// Picks up in-progress jobs left behind by a previous process
    ///
    /// Stale jobs are failed. Others are claimed for this worker and
    /// dispatched at their resume phase, or from the beginning when no
    /// checkpoint exists. Jobs this worker already owns are skipped, so a
    /// second pass dispatches nothing.
    pub fn recover(&self, dispatcher: &dyn JobDispatcher) -> ControlResult<RecoveryReport> {
        let stale_after = to_chrono(self.config.stale_after());
        let now = Utc::now();
        let jobs = lock(&self.storage).list_jobs_by_status(JobStatus::InProgress)?;
        let mut report = RecoveryReport::default();

        for mut job in jobs {
            if job.worker_id.as_deref() == Some(self.worker_id.as_str()) {
                report.skipped.push(job.id);
                continue;
            }

            if now - job.updated_at > stale_after {
                self.fail(job.id, STALE_REASON)?;
                report.failed.push(job.id);
                continue;
            }

            let claimed =
                lock(&self.storage).claim_job(job.id, job.worker_id.as_deref(), &self.worker_id)?;
            if !claimed {
                report.skipped.push(job.id);
                continue;
            }

            let phase = match self.checkpoints.load(job.id)? {
                Some(checkpoint) => {
                    job.phase = checkpoint.resume_phase();
                    job.phase
                }
                None => {
                    job.phase = JobPhase::Queued;
                    JobPhase::Crawling
                }
            };
            job.worker_id = Some(self.worker_id.clone());
            self.commit(&job, &[JobStatus::InProgress], "recover")?;

            info!("Recovered job {} at {}", job.id, phase);
            dispatcher.dispatch(job.clone(), phase);
            report.resumed.push((job.id, phase));
        }

        Ok(report)
    }
}
