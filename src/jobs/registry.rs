//! Registry of jobs whose pipeline task is running in this process
//!
//! A job is registered for as long as its task runs. While it crawls, the
//! task publishes its latest checkpoint, every fetched page and the live
//! counters here; the lifecycle turns those into a checkpoint on pause or
//! timeout and uses the registered `CrawlControl` to stop the loop.

use crate::checkpoint::{Checkpoint, ProgressCounters};
use crate::crawler::{CrawlControl, CrawlProgress};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug)]
struct LiveJob {
    control: CrawlControl,
    checkpoint: Option<Checkpoint>,
    /// Pages fetched since `checkpoint` was taken
    visited_since: Vec<String>,
    progress: Option<CrawlProgress>,
}

impl LiveJob {
    fn new(control: CrawlControl) -> Self {
        Self {
            control,
            checkpoint: None,
            visited_since: Vec::new(),
            progress: None,
        }
    }
}

/// Shared map of running jobs, keyed by job ID
#[derive(Debug, Clone, Default)]
pub struct LiveJobs {
    jobs: Arc<Mutex<HashMap<i64, LiveJob>>>,
    released: Arc<Notify>,
}

/// Keeps a job registered until dropped
#[derive(Debug)]
pub struct LiveRegistration {
    live: LiveJobs,
    job_id: i64,
}

impl Drop for LiveRegistration {
    fn drop(&mut self) {
        self.live.unregister(self.job_id);
    }
}

impl LiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<i64, LiveJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a running task, replacing any previous one for the job
    pub fn register(&self, job_id: i64, control: CrawlControl) {
        self.jobs().insert(job_id, LiveJob::new(control));
    }

    /// Registers a task unless another one for the job is registered
    ///
    /// The job stays registered until the returned guard drops.
    pub fn try_enter(&self, job_id: i64, control: CrawlControl) -> Option<LiveRegistration> {
        let mut jobs = self.jobs();
        if jobs.contains_key(&job_id) {
            return None;
        }
        jobs.insert(job_id, LiveJob::new(control));
        drop(jobs);

        Some(LiveRegistration {
            live: self.clone(),
            job_id,
        })
    }

    /// Registers a task once the job's previous task has unregistered
    pub async fn enter(&self, job_id: i64, control: CrawlControl) -> LiveRegistration {
        loop {
            if let Some(registration) = self.try_enter(job_id, control.clone()) {
                return registration;
            }
            self.wait_released(job_id).await;
        }
    }

    pub fn unregister(&self, job_id: i64) {
        self.jobs().remove(&job_id);
        self.released.notify_waiters();
    }

    pub fn is_running(&self, job_id: i64) -> bool {
        self.jobs().contains_key(&job_id)
    }

    /// Waits until no task is registered for the job
    pub async fn wait_released(&self, job_id: i64) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if !self.is_running(job_id) {
                return;
            }
            released.await;
        }
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    pub fn update_checkpoint(&self, job_id: i64, checkpoint: &Checkpoint) {
        if let Some(job) = self.jobs().get_mut(&job_id) {
            job.checkpoint = Some(checkpoint.clone());
            job.visited_since.clear();
        }
    }

    /// Records a page fetched by the running crawl
    pub fn record_page(&self, job_id: i64, url: &str) {
        if let Some(job) = self.jobs().get_mut(&job_id) {
            job.visited_since.push(url.to_string());
        }
    }

    pub fn update_progress(&self, job_id: i64, progress: &CrawlProgress) {
        if let Some(job) = self.jobs().get_mut(&job_id) {
            job.progress = Some(progress.clone());
        }
    }

    /// Drops crawl state once the crawl phase is over
    pub fn clear_crawl_state(&self, job_id: i64) {
        if let Some(job) = self.jobs().get_mut(&job_id) {
            job.checkpoint = None;
            job.visited_since.clear();
            job.progress = None;
        }
    }

    /// Live counters of the running crawl
    pub fn latest_progress(&self, job_id: i64) -> Option<CrawlProgress> {
        self.jobs().get(&job_id).and_then(|job| job.progress.clone())
    }

    /// A checkpoint reflecting the crawl as of its last fetched page
    ///
    /// Starts from the latest emitted checkpoint, moves pages fetched since
    /// then from the queue to the visited list and takes the counters from
    /// the live progress. None while nothing has been crawled.
    pub fn snapshot(&self, job_id: i64) -> Option<Checkpoint> {
        let jobs = self.jobs();
        let job = jobs.get(&job_id)?;
        if job.checkpoint.is_none() && job.visited_since.is_empty() {
            return None;
        }

        let mut checkpoint = job.checkpoint.clone().unwrap_or_default();
        let mut visited: HashSet<String> = checkpoint.pages_visited.iter().cloned().collect();
        for url in &job.visited_since {
            if visited.insert(url.clone()) {
                checkpoint.pages_visited.push(url.clone());
            }
        }
        checkpoint.pages_queued.retain(|url| !visited.contains(url));
        checkpoint.frontier.retain(|entry| !visited.contains(&entry.url));

        if let Some(progress) = &job.progress {
            checkpoint.progress = ProgressCounters::from(progress);
        }
        checkpoint.timestamp = Utc::now();
        Some(checkpoint)
    }

    /// Asks the task's crawl to pause; returns false if the job is not running here
    pub fn signal_pause(&self, job_id: i64) -> bool {
        match self.jobs().get(&job_id) {
            Some(job) => {
                job.control.pause();
                true
            }
            None => false,
        }
    }

    /// Asks the task's crawl to stop; returns false if the job is not running here
    pub fn signal_stop(&self, job_id: i64) -> bool {
        match self.jobs().get(&job_id) {
            Some(job) => {
                job.control.stop();
                true
            }
            None => false,
        }
    }
}
