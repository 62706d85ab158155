//! Integration tests for jobs and batches
//!
//! Company sites are served by wiremock; jobs run through the pipeline runner
//! with in-memory SQLite storage.

use company_intel::batch::BatchScheduler;
use company_intel::config::{CrawlConfig, JobsConfig, SchedulerConfig, UserAgentConfig};
use company_intel::crawler::{HttpFetcher, RateLimiter};
use company_intel::jobs::{job_events, JobDispatcher, JobEventReceiver, JobLifecycle, PipelineRunner};
use company_intel::robots::RobotsCache;
use company_intel::state::{BatchStatus, JobPhase, JobStatus};
use company_intel::storage::{lock, share, SqliteStorage, Storage};
use company_intel::Checkpoint;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    lifecycle: Arc<JobLifecycle<SqliteStorage>>,
    runner: PipelineRunner<SqliteStorage>,
    scheduler: Arc<BatchScheduler<SqliteStorage>>,
    events: Option<JobEventReceiver>,
}

fn harness(jobs: JobsConfig, global_concurrency: u32) -> Harness {
    let storage = share(SqliteStorage::new_in_memory().unwrap());
    let (events_tx, events_rx) = job_events();
    let lifecycle = Arc::new(
        JobLifecycle::new(storage, jobs)
            .with_worker_id("worker-1")
            .with_events(events_tx),
    );

    let user_agent = UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    };
    let crawl = CrawlConfig {
        max_pages: 50,
        requests_per_second: 1000.0,
        burst: 10,
        checkpoint_page_interval: 1,
        ..CrawlConfig::default()
    };
    let runner = PipelineRunner::new(
        Arc::clone(&lifecycle),
        crawl,
        Arc::new(HttpFetcher::new(&user_agent).unwrap()),
        Arc::new(RateLimiter::new(1000.0, 10)),
        Arc::new(RobotsCache::new("TestBot", Duration::from_secs(3600))),
    );
    let scheduler = Arc::new(BatchScheduler::new(
        Arc::clone(&lifecycle),
        Arc::new(runner.clone()),
        SchedulerConfig {
            global_concurrency,
            poll_interval_secs: 1,
        },
    ));

    Harness {
        lifecycle,
        runner,
        scheduler,
        events: Some(events_rx),
    }
}

/// A company site with a home page and `pages` sub-pages, each delayed by `delay`
async fn company_site(pages: usize, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let links: String = (0..pages)
        .map(|i| format!(r#"<a href="/page-{}">Page {}</a>"#, i, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(format!("<html><body>{}</body></html>", links), "text/html")
                .set_delay(delay),
        )
        .mount(&server)
        .await;

    for i in 0..pages {
        Mock::given(method("GET"))
            .and(path(format!("/page-{}", i)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        format!("<html><body>Content of page {}</body></html>", i),
                        "text/html",
                    )
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
    }
    server
}

/// Fetches of one route seen by a server
async fn hits(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == route)
        .count()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_batches_run_to_completion() {
    let mut h = harness(JobsConfig::default(), 2);
    let mut sites = Vec::new();
    let mut batches = Vec::new();

    for name in ["alpha", "beta"] {
        let mut job_ids = Vec::new();
        for _ in 0..2 {
            let site = company_site(2, Duration::ZERO).await;
            job_ids.push(h.lifecycle.create_job(name, &site.uri()).unwrap());
            sites.push(site);
        }
        let batch = h.scheduler.create_batch(name, &job_ids, 1, 1).unwrap();
        h.scheduler.open(&batch).unwrap();
        batches.push((batch, job_ids));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let events = h.events.take().unwrap();
    let looping = Arc::clone(&h.scheduler);
    let scheduler_task = tokio::spawn(async move { looping.run(events, shutdown_rx).await });

    let scheduler = Arc::clone(&h.scheduler);
    let runner = h.runner.clone();
    wait_until(|| !scheduler.has_unfinished_work().unwrap() && runner.running() == 0).await;
    shutdown_tx.send(true).unwrap();
    scheduler_task.await.unwrap();

    for (batch_id, job_ids) in &batches {
        let batch = h.scheduler.get_batch(batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.counts.completed, 2);

        for &job_id in job_ids {
            let job = h.lifecycle.get_job(job_id).unwrap();
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.pages_crawled, 3);
            let stored = lock(h.lifecycle.storage()).count_pages(job_id).unwrap();
            assert_eq!(stored, 3);
        }
    }
    for site in &sites {
        assert_eq!(hits(site, "/").await, 1);
    }
}

#[tokio::test]
async fn test_recovery_resumes_after_crawl_without_refetching() {
    let h = harness(JobsConfig::default(), 2);
    let site = company_site(2, Duration::ZERO).await;
    let job_id = h.lifecycle.create_job("Acme", &site.uri()).unwrap();

    // Left behind by a worker that crashed after crawling
    assert!(lock(h.lifecycle.storage())
        .try_admit_job(job_id, "dead-worker", u32::MAX, u32::MAX)
        .unwrap());
    let mut checkpoint = Checkpoint::new();
    checkpoint.pages_visited.push(format!("{}/", site.uri()));
    h.lifecycle.checkpoints().save(job_id, &checkpoint).unwrap();

    let report = h.lifecycle.recover(&h.runner).unwrap();
    assert_eq!(report.resumed, vec![(job_id, JobPhase::Extracting)]);
    h.runner.wait_idle().await;

    let job = h.lifecycle.get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.worker_id.as_deref(), Some("worker-1"));
    assert_eq!(hits(&site, "/").await, 0);

    // Running recovery again finds nothing to do
    let again = h.lifecycle.recover(&h.runner).unwrap();
    assert!(again.resumed.is_empty());
}

#[tokio::test]
async fn test_pause_saves_progress_and_resume_continues() {
    let h = harness(JobsConfig::default(), 2);
    let site = company_site(8, Duration::from_millis(100)).await;
    let job_id = h.lifecycle.create_job("Acme", &site.uri()).unwrap();

    let job = h.lifecycle.start(job_id).unwrap();
    h.runner.dispatch(job, JobPhase::Crawling);

    let live = h.lifecycle.live().clone();
    wait_until(|| {
        live.latest_progress(job_id)
            .is_some_and(|progress| progress.pages_crawled >= 2)
    })
    .await;

    let paused = h.lifecycle.pause(job_id, "worker-1").unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    h.runner.wait_idle().await;

    let checkpoint = h.lifecycle.checkpoints().load(job_id).unwrap().unwrap();
    assert!(checkpoint.pages_visited.len() >= 2);
    assert!(checkpoint.pages_visited.len() < 9);
    assert_eq!(h.lifecycle.get_job(job_id).unwrap().status, JobStatus::Paused);

    let phase = h.lifecycle.resume(job_id, "worker-1", &h.runner).unwrap();
    assert_eq!(phase, JobPhase::Extracting);
    h.runner.wait_idle().await;

    let job = h.lifecycle.get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.paused_duration_ms >= 0);
    assert!(job.paused_at.is_none());
    assert_eq!(hits(&site, "/").await, 1);
}

#[tokio::test]
async fn test_timeout_keeps_partial_results() {
    let jobs = JobsConfig {
        timeout_secs: 1,
        ..JobsConfig::default()
    };
    let h = harness(jobs, 2);
    let site = company_site(20, Duration::from_millis(100)).await;
    let job_id = h.lifecycle.create_job("Acme", &site.uri()).unwrap();

    let job = h.lifecycle.start(job_id).unwrap();
    h.runner.dispatch(job, JobPhase::Crawling);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(h.lifecycle.check_timeouts().unwrap(), vec![job_id]);
    h.runner.wait_idle().await;

    let job = h.lifecycle.get_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_reason.as_deref(), Some("timeout"));

    let checkpoint = h.lifecycle.checkpoints().load(job_id).unwrap().unwrap();
    assert!(!checkpoint.pages_visited.is_empty());
    assert!(lock(h.lifecycle.storage()).count_pages(job_id).unwrap() > 0);
}

#[tokio::test]
async fn test_cancelled_batch_stops_running_jobs() {
    let h = harness(JobsConfig::default(), 4);
    let site = company_site(20, Duration::from_millis(100)).await;
    let job_ids: Vec<i64> = (0..3)
        .map(|i| h.lifecycle.create_job(&format!("Acme {}", i), &site.uri()).unwrap())
        .collect();
    let batch = h.scheduler.create_batch("acme", &job_ids, 1, 2).unwrap();
    h.scheduler.start(&batch).unwrap();

    let live = h.lifecycle.live().clone();
    wait_until(|| live.len() == 2).await;

    let record = h.scheduler.cancel(&batch).unwrap();
    h.runner.wait_idle().await;

    assert_eq!(record.status, BatchStatus::Cancelled);
    assert_eq!(record.counts.failed, 3);
    for job_id in job_ids {
        let job = h.lifecycle.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure_reason.as_deref(), Some("cancelled"));
    }
    assert!(h.lifecycle.live().is_empty());
}
