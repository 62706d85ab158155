//! Pipeline runner - executes dispatched jobs phase by phase
//!
//! Each dispatched job runs in its own tokio task and walks
//! crawl → extract → analyze → generate from the phase it was dispatched at.
//! Before every phase (and every analysis section) the job is re-read; a job
//! that is no longer in progress (paused, failed, timed out) ends the task.

use crate::checkpoint::Checkpoint;
use crate::config::CrawlConfig;
use crate::crawler::{
    CrawlControl, CrawlWorker, CrawledPage, DocumentExtractor, Fetcher, RateLimiter, StopReason,
};
use crate::jobs::lifecycle::JobLifecycle;
use crate::robots::RobotsCache;
use crate::state::{JobPhase, JobStatus};
use crate::storage::{lock, JobRecord, Storage};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives jobs that are ready to run at a given phase
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, job: JobRecord, phase: JobPhase);
}

/// LLM usage reported by a pipeline stage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageUsage {
    pub tokens: u64,
    pub cost_usd: f64,
}

/// The post-crawl stages of the pipeline
///
/// Implementations live outside this crate (entity extraction, LLM analysis,
/// report generation); errors fail the job with the error text as reason.
#[async_trait]
pub trait PipelineStages: Send + Sync {
    /// Extracts entities from the crawled pages, returning how many were found
    async fn extract(&self, job: &JobRecord, pages: &[CrawledPage]) -> anyhow::Result<u64>;

    /// Names of the analysis sections, in execution order
    fn analysis_sections(&self) -> Vec<String>;

    async fn analyze_section(
        &self,
        job: &JobRecord,
        section: &str,
        pages: &[CrawledPage],
    ) -> anyhow::Result<StageUsage>;

    async fn generate(&self, job: &JobRecord, checkpoint: &Checkpoint)
        -> anyhow::Result<StageUsage>;
}

/// Stages that do nothing beyond the crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlOnlyStages;

#[async_trait]
impl PipelineStages for CrawlOnlyStages {
    async fn extract(&self, _job: &JobRecord, _pages: &[CrawledPage]) -> anyhow::Result<u64> {
        Ok(0)
    }

    fn analysis_sections(&self) -> Vec<String> {
        Vec::new()
    }

    async fn analyze_section(
        &self,
        _job: &JobRecord,
        _section: &str,
        _pages: &[CrawledPage],
    ) -> anyhow::Result<StageUsage> {
        Ok(StageUsage::default())
    }

    async fn generate(
        &self,
        _job: &JobRecord,
        _checkpoint: &Checkpoint,
    ) -> anyhow::Result<StageUsage> {
        Ok(StageUsage::default())
    }
}

/// Whether the task should go on to the next phase
enum Flow {
    Continue,
    Halt,
}

/// Runs dispatched jobs on the tokio runtime
pub struct PipelineRunner<S: Storage + 'static> {
    lifecycle: Arc<JobLifecycle<S>>,
    crawl_config: CrawlConfig,
    fetcher: Arc<dyn Fetcher>,
    documents: Option<Arc<dyn DocumentExtractor>>,
    limiter: Arc<RateLimiter>,
    robots: Arc<RobotsCache>,
    stages: Arc<dyn PipelineStages>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S: Storage + 'static> Clone for PipelineRunner<S> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: Arc::clone(&self.lifecycle),
            crawl_config: self.crawl_config.clone(),
            fetcher: Arc::clone(&self.fetcher),
            documents: self.documents.clone(),
            limiter: Arc::clone(&self.limiter),
            robots: Arc::clone(&self.robots),
            stages: Arc::clone(&self.stages),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<S: Storage + 'static> PipelineRunner<S> {
    /// Creates a runner with crawl-only stages
    ///
    /// # Arguments
    ///
    /// * `lifecycle` - Job state machine (also owns the live-job registry)
    /// * `crawl_config` - Limits for every crawl session
    /// * `fetcher` - Page fetch collaborator
    /// * `limiter` - Rate limiter shared by all jobs
    /// * `robots` - robots.txt cache shared by all jobs
    pub fn new(
        lifecycle: Arc<JobLifecycle<S>>,
        crawl_config: CrawlConfig,
        fetcher: Arc<dyn Fetcher>,
        limiter: Arc<RateLimiter>,
        robots: Arc<RobotsCache>,
    ) -> Self {
        Self {
            lifecycle,
            crawl_config,
            fetcher,
            documents: None,
            limiter,
            robots,
            stages: Arc::new(CrawlOnlyStages),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_stages(mut self, stages: Arc<dyn PipelineStages>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_document_extractor(mut self, documents: Arc<dyn DocumentExtractor>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycle<S>> {
        &self.lifecycle
    }

    /// Number of dispatched tasks that have not finished
    pub fn running(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }

    /// Waits until every dispatched task (including ones dispatched meanwhile) has ended
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
                tasks.drain(..).collect()
            };
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.await {
                    warn!("Job task ended abnormally: {}", e);
                }
            }
        }
    }

    /// Runs one job from `phase` until it completes, fails or stops running
    ///
    /// Waits first for an earlier task of the same job (one that was paused
    /// and is still draining) to end.
    pub async fn run_job(&self, job_id: i64, phase: JobPhase) {
        let mut phase = match phase {
            JobPhase::Queued => JobPhase::Crawling,
            other => other,
        };
        let control = CrawlControl::new();
        let _registration = self.lifecycle.live().enter(job_id, control.clone()).await;

        loop {
            let job = match self.lifecycle.get_job(job_id) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Job {} disappeared: {}", job_id, e);
                    return;
                }
            };
            if job.status != JobStatus::InProgress {
                debug!("Job {} is {}, stopping at {}", job_id, job.status, phase);
                return;
            }

            if phase == JobPhase::Completed {
                if let Err(e) = self.lifecycle.complete(job_id) {
                    warn!("Could not complete job {}: {}", job_id, e);
                }
                return;
            }

            let job = match self.lifecycle.enter_phase(job_id, phase) {
                Ok(job) => job,
                Err(e) => {
                    debug!("Job {} cannot enter {}: {}", job_id, phase, e);
                    return;
                }
            };

            let result = match phase {
                JobPhase::Crawling => self.crawl(&job, control.clone()).await,
                JobPhase::Extracting => self.extract(&job).await,
                JobPhase::Analyzing => self.analyze(&job).await,
                _ => self.generate(&job).await,
            };

            match result {
                Ok(Flow::Continue) => {
                    phase = phase.next().unwrap_or(JobPhase::Completed);
                }
                Ok(Flow::Halt) => return,
                Err(e) => {
                    let reason = format!("{} failed: {:#}", phase, e);
                    if let Err(e) = self.lifecycle.fail(job_id, &reason) {
                        debug!("Could not fail job {}: {}", job_id, e);
                    }
                    return;
                }
            }
        }
    }

    async fn crawl(&self, job: &JobRecord, control: CrawlControl) -> anyhow::Result<Flow> {
        let job_id = job.id;
        let live = self.lifecycle.live().clone();

        let checkpoint = self.lifecycle.checkpoints().load(job_id)?;
        if let Some(checkpoint) = &checkpoint {
            live.update_checkpoint(job_id, checkpoint);
        }

        let pages_storage = self.lifecycle.storage().clone();
        let pages_live = live.clone();
        let checkpoint_store = self.lifecycle.checkpoints().clone();
        let checkpoint_live = live.clone();
        let progress_live = live.clone();

        let mut worker = CrawlWorker::new(
            self.crawl_config.clone(),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.limiter),
            Arc::clone(&self.robots),
        )
        .with_control(control)
        .on_page(move |page| {
            pages_live.record_page(job_id, &page.url);
            if let Err(e) = lock(&pages_storage).insert_page(job_id, page) {
                warn!("Failed to store page {} for job {}: {}", page.url, job_id, e);
            }
        })
        .on_checkpoint(move |checkpoint| {
            checkpoint_live.update_checkpoint(job_id, checkpoint);
            // A failed save is retried with the next checkpoint
            if let Err(e) = checkpoint_store.save(job_id, checkpoint) {
                warn!("Failed to save checkpoint for job {}: {}", job_id, e);
            }
        })
        .on_progress(move |progress| progress_live.update_progress(job_id, progress));

        if let Some(documents) = &self.documents {
            worker = worker.with_document_extractor(Arc::clone(documents));
        }

        let outcome = worker.crawl(&job.website, checkpoint.as_ref()).await;
        live.clear_crawl_state(job_id);

        {
            let mut storage = lock(self.lifecycle.storage());
            storage.update_job_progress(
                job_id,
                outcome.progress.pages_crawled,
                outcome.checkpoint.entities_extracted_count,
            )?;
        }

        match outcome.stop_reason {
            StopReason::Paused | StopReason::Stopped => {
                info!("Crawl of job {} ended early ({})", job_id, outcome.stop_reason);
                Ok(Flow::Halt)
            }
            StopReason::Error => anyhow::bail!("cannot crawl {}", job.website),
            reason => {
                info!(
                    "Crawl of job {} finished ({}): {} pages",
                    job_id, reason, outcome.progress.pages_crawled
                );
                Ok(Flow::Continue)
            }
        }
    }

    fn successful_pages(&self, job_id: i64) -> anyhow::Result<Vec<CrawledPage>> {
        let mut pages = lock(self.lifecycle.storage()).list_pages(job_id)?;
        pages.retain(|page| page.is_success());
        Ok(pages)
    }

    async fn extract(&self, job: &JobRecord) -> anyhow::Result<Flow> {
        let pages = self.successful_pages(job.id)?;
        let entities = self.stages.extract(job, &pages).await?;

        self.lifecycle.checkpoints().record_entities(job.id, entities)?;
        lock(self.lifecycle.storage()).update_job_progress(job.id, job.pages_crawled, entities)?;

        info!("Job {}: extracted {} entities from {} pages", job.id, entities, pages.len());
        Ok(Flow::Continue)
    }

    async fn analyze(&self, job: &JobRecord) -> anyhow::Result<Flow> {
        let pages = self.successful_pages(job.id)?;
        let mut checkpoint = self
            .lifecycle
            .checkpoints()
            .load(job.id)?
            .unwrap_or_default();

        for section in self.stages.analysis_sections() {
            if checkpoint.is_section_done(&section) {
                debug!("Job {}: section {} already done", job.id, section);
                continue;
            }
            if self.lifecycle.get_job(job.id)?.status != JobStatus::InProgress {
                return Ok(Flow::Halt);
            }

            let usage = self.stages.analyze_section(job, &section, &pages).await?;
            lock(self.lifecycle.storage()).add_job_usage(job.id, usage.tokens, usage.cost_usd)?;
            checkpoint = self
                .lifecycle
                .checkpoints()
                .mark_section_done(job.id, &section)?;
        }
        Ok(Flow::Continue)
    }

    async fn generate(&self, job: &JobRecord) -> anyhow::Result<Flow> {
        let checkpoint = self
            .lifecycle
            .checkpoints()
            .load(job.id)?
            .unwrap_or_default();
        let usage = self.stages.generate(job, &checkpoint).await?;
        lock(self.lifecycle.storage()).add_job_usage(job.id, usage.tokens, usage.cost_usd)?;
        Ok(Flow::Continue)
    }
}

impl<S: Storage + 'static> JobDispatcher for PipelineRunner<S> {
    fn dispatch(&self, job: JobRecord, phase: JobPhase) {
        debug!("Dispatching job {} at {}", job.id, phase);
        let runner = self.clone();
        let handle = tokio::spawn(async move { runner.run_job(job.id, phase).await });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}
