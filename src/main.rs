//! Company-Intel main entry point
//!
//! This is the command-line interface for crawling company websites and
//! running batches of company jobs.

use clap::{Parser, Subcommand};
use company_intel::batch::BatchScheduler;
use company_intel::config::{load_config_with_hash, Config};
use company_intel::crawler::{CrawlWorker, Fetcher, HttpFetcher, RateLimiter};
use company_intel::jobs::{job_events, JobEventReceiver, JobLifecycle, PipelineRunner};
use company_intel::output::{
    format_crawl_summary, load_statistics, print_statistics, write_crawl_summary,
};
use company_intel::robots::RobotsCache;
use company_intel::state::JobStatus;
use company_intel::storage::{lock, open_storage, share, SqliteStorage, Storage};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Company-Intel: resumable company website crawling
///
/// Company-Intel crawls company websites while respecting robots.txt and
/// per-domain rate limits, checkpoints every job so it survives restarts,
/// and schedules batches of companies fairly.
#[derive(Parser, Debug)]
#[command(name = "company-intel")]
#[command(version = "1.0.0")]
#[command(about = "Resumable company website crawling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl one website and print a summary
    Crawl {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Website to crawl
        #[arg(long)]
        url: String,

        /// Write the markdown summary to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        summary: Option<PathBuf>,
    },

    /// Create jobs for companies and put them in a new batch
    Enqueue {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Batch name
        #[arg(long)]
        name: String,

        /// Batch priority (lower runs first)
        #[arg(long, default_value_t = 100)]
        priority: i32,

        /// Maximum jobs of this batch running at once
        #[arg(long, default_value_t = 2)]
        concurrency: u32,

        /// Companies as NAME=URL
        #[arg(value_name = "NAME=URL", required = true, value_parser = parse_company)]
        companies: Vec<(String, String)>,
    },

    /// Recover interrupted jobs and run batches until they finish
    Run {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Also resume paused jobs (for example ones paused by an interrupted run)
        #[arg(long)]
        resume_paused: bool,
    },

    /// Show job and batch statistics from the database
    Stats {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

impl Command {
    fn config_path(&self) -> &Path {
        match self {
            Command::Crawl { config, .. }
            | Command::Enqueue { config, .. }
            | Command::Run { config, .. }
            | Command::Stats { config } => config,
        }
    }
}

fn parse_company(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
            Ok((name.trim().to_string(), url.trim().to_string()))
        }
        _ => Err(format!("expected NAME=URL, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    let config_path = cli.command.config_path();
    tracing::info!("Loading configuration from: {}", config_path.display());
    let config = match load_config_with_hash(config_path) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Crawl { url, summary, .. } => {
            handle_crawl(&config, &url, summary.as_deref()).await
        }
        Command::Enqueue {
            name,
            priority,
            concurrency,
            companies,
            ..
        } => handle_enqueue(&config, &name, priority, concurrency, &companies),
        Command::Run { resume_paused, .. } => handle_run(&config, resume_paused).await,
        Command::Stats { .. } => handle_stats(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("company_intel=info,warn"),
            1 => EnvFilter::new("company_intel=debug,info"),
            2 => EnvFilter::new("company_intel=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Everything `enqueue` and `run` share
struct Runtime {
    lifecycle: Arc<JobLifecycle<SqliteStorage>>,
    runner: PipelineRunner<SqliteStorage>,
    scheduler: Arc<BatchScheduler<SqliteStorage>>,
    events: JobEventReceiver,
}

fn build_runtime(config: &Config) -> Result<Runtime, Box<dyn Error>> {
    let storage = share(open_storage(Path::new(&config.output.database_path))?);
    let (events_tx, events) = job_events();
    let lifecycle =
        Arc::new(JobLifecycle::new(storage, config.jobs.clone()).with_events(events_tx));
    tracing::info!("Worker ID: {}", lifecycle.worker_id());

    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.user_agent)?);
    let limiter = Arc::new(RateLimiter::new(
        config.crawler.requests_per_second,
        config.crawler.burst,
    ));
    let robots = Arc::new(RobotsCache::new(
        config.user_agent.crawler_name.clone(),
        config.jobs.robots_cache_ttl(),
    ));

    let runner = PipelineRunner::new(
        Arc::clone(&lifecycle),
        config.crawler.clone(),
        fetcher,
        limiter,
        robots,
    );
    let scheduler = Arc::new(BatchScheduler::new(
        Arc::clone(&lifecycle),
        Arc::new(runner.clone()),
        config.scheduler.clone(),
    ));

    Ok(Runtime {
        lifecycle,
        runner,
        scheduler,
        events,
    })
}

/// Handles `crawl`: one session against one website, no job bookkeeping
async fn handle_crawl(
    config: &Config,
    url: &str,
    summary_path: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let fetcher = Arc::new(HttpFetcher::new(&config.user_agent)?);
    let limiter = Arc::new(RateLimiter::new(
        config.crawler.requests_per_second,
        config.crawler.burst,
    ));
    let robots = Arc::new(RobotsCache::new(
        config.user_agent.crawler_name.clone(),
        config.jobs.robots_cache_ttl(),
    ));

    let worker = CrawlWorker::new(config.crawler.clone(), fetcher, limiter, robots).on_progress(
        |progress| {
            tracing::debug!(
                "{} pages crawled, {} queued: {}",
                progress.pages_crawled,
                progress.pages_queued,
                progress.current_activity
            );
        },
    );

    // Ctrl-C stops the session after the page in flight
    let control = worker.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping crawl");
            control.stop();
        }
    });

    tracing::info!("Crawling {}", url);
    let outcome = worker.crawl(url, None).await;
    tracing::info!(
        "Crawl finished ({}): {} pages crawled, {} errors",
        outcome.stop_reason,
        outcome.progress.pages_crawled,
        outcome.progress.errors_count
    );

    match summary_path {
        Some(path) => {
            write_crawl_summary(url, &outcome, path)?;
            println!("✓ Summary written to: {}", path.display());
        }
        None => println!("{}", format_crawl_summary(url, &outcome)),
    }

    Ok(())
}

/// Handles `enqueue`: creates the jobs and an open batch for them
fn handle_enqueue(
    config: &Config,
    name: &str,
    priority: i32,
    concurrency: u32,
    companies: &[(String, String)],
) -> Result<(), Box<dyn Error>> {
    let runtime = build_runtime(config)?;

    let mut job_ids = Vec::with_capacity(companies.len());
    for (company, website) in companies {
        job_ids.push(runtime.lifecycle.create_job(company, website)?);
    }

    let batch_id = runtime
        .scheduler
        .create_batch(name, &job_ids, priority, concurrency)?;
    runtime.scheduler.open(&batch_id)?;

    println!("✓ Batch {} created with {} jobs", batch_id, job_ids.len());
    println!("  Run `company-intel run <CONFIG>` to process it");
    Ok(())
}

/// Handles `run`: recovery, then the scheduler loop until no work is left
async fn handle_run(config: &Config, resume_paused: bool) -> Result<(), Box<dyn Error>> {
    let Runtime {
        lifecycle,
        runner,
        scheduler,
        events,
    } = build_runtime(config)?;

    let report = lifecycle.recover(&runner)?;
    tracing::info!(
        "Recovery: {} resumed, {} failed as stale, {} skipped",
        report.resumed.len(),
        report.failed.len(),
        report.skipped.len()
    );

    if resume_paused {
        let paused = lock(lifecycle.storage()).list_jobs_by_status(JobStatus::Paused)?;
        for job in paused {
            match lifecycle.resume(job.id, lifecycle.worker_id(), &runner) {
                Ok(phase) => tracing::info!("Resumed job {} at {}", job.id, phase),
                Err(e) => tracing::warn!("Could not resume job {}: {}", job.id, e),
            }
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(events, shutdown_rx).await })
    };

    let mut ticker = tokio::time::interval(config.scheduler.poll_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !scheduler.has_unfinished_work()? && runner.running() == 0 {
                    tracing::info!("All batches finished");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, pausing running jobs");
                pause_owned_jobs(&lifecycle);
                break;
            }
        }
    }

    runner.wait_idle().await;
    // The scheduler task may already have exited
    let _ = shutdown_tx.send(true);
    scheduler_task.await?;

    let stats = load_statistics(&*lock(lifecycle.storage()))?;
    print_statistics(&stats);
    Ok(())
}

/// Pauses every in-progress job this process owns, saving their checkpoints
fn pause_owned_jobs(lifecycle: &JobLifecycle<SqliteStorage>) {
    let running = match lock(lifecycle.storage()).list_jobs_by_status(JobStatus::InProgress) {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!("Could not list running jobs: {}", e);
            return;
        }
    };

    for job in running
        .into_iter()
        .filter(|job| job.worker_id.as_deref() == Some(lifecycle.worker_id()))
    {
        match lifecycle.pause(job.id, lifecycle.worker_id()) {
            Ok(_) => tracing::info!("Paused job {} ({})", job.id, job.company_name),
            Err(e) => tracing::warn!("Could not pause job {}: {}", job.id, e),
        }
    }
}

/// Handles `stats`: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn Error>> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}
