//! Crawl worker - drives one site's crawl session
//!
//! The worker owns a fresh `PriorityFrontier` per session and shares the
//! process-wide `RateLimiter` and `RobotsCache`. Each loop iteration:
//! 1. Checks stop conditions (stop flag, pause flag, max pages, max time)
//! 2. Pops the next URL and skips it if already visited
//! 3. Applies robots.txt policy, then waits for the domain's rate limit
//! 4. Fetches the page (or hands PDFs to the document extractor)
//! 5. Detects duplicate content, enqueues same-site and followed social links
//! 6. Reports the page and progress, and checkpoints on page/time intervals
//!
//! A final checkpoint is built whatever the stop reason, so every session
//! leaves the job resumable.

use crate::checkpoint::Checkpoint;
use crate::config::CrawlConfig;
use crate::crawler::classifier::{ContentClassifier, KeywordClassifier};
use crate::crawler::fetcher::{DocumentExtractor, FetchResponse, Fetcher};
use crate::crawler::frontier::{PriorityFrontier, QueuedUrl};
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::social::{HostSocialDetector, SocialLinkDetector};
use crate::crawler::types::{CrawlControl, CrawlProgress, CrawledPage, StopReason};
use crate::robots::{RobotsCache, RobotsDirectives};
use crate::url::{extract_domain, is_pdf_url, normalize_url};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Hex characters kept from the content digest
const CONTENT_HASH_LEN: usize = 16;

pub type ProgressCallback = Box<dyn Fn(&CrawlProgress) + Send + Sync>;
pub type CheckpointCallback = Box<dyn Fn(&Checkpoint) + Send + Sync>;
pub type PageCallback = Box<dyn Fn(&CrawledPage) + Send + Sync>;

/// Everything a finished session hands back
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub pages: Vec<CrawledPage>,
    pub checkpoint: Checkpoint,
    pub stop_reason: StopReason,
    pub progress: CrawlProgress,
}

/// Computes the duplicate-detection hash of extracted text
///
/// Text is lower-cased and whitespace-collapsed before hashing, so pages that
/// differ only in case or layout hash the same.
pub fn content_hash(text: &str) -> String {
    let normalized = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
    digest[..CONTENT_HASH_LEN].to_string()
}

/// Outcome of the robots.txt check for one URL
enum RobotsVerdict {
    Allowed,
    Disallowed,
    /// robots.txt could not be fetched in time
    Unavailable,
}

/// Mutable state of one running session
struct Session {
    frontier: PriorityFrontier,
    progress: CrawlProgress,
    pages: Vec<CrawledPage>,
    external_links: Vec<String>,
    external_seen: HashSet<String>,
    current_depth: u32,
    entities_extracted: u64,
    sections_completed: Vec<String>,
}

impl Session {
    fn checkpoint(&self) -> Checkpoint {
        let mut checkpoint = Checkpoint::from_frontier(
            self.frontier.get_state(),
            &self.progress,
            self.external_links.clone(),
            self.current_depth,
        );
        checkpoint.entities_extracted_count = self.entities_extracted;
        checkpoint.analysis_sections_completed = self.sections_completed.clone();
        checkpoint
    }

    fn record_external(&mut self, url: &str) {
        if self.external_seen.insert(url.to_string()) {
            self.external_links.push(url.to_string());
            self.progress.external_links = self.external_links.len() as u32;
        }
    }
}

/// Crawls one site with politeness, dedup and checkpointing
pub struct CrawlWorker {
    config: CrawlConfig,
    fetcher: Arc<dyn Fetcher>,
    documents: Option<Arc<dyn DocumentExtractor>>,
    classifier: Arc<dyn ContentClassifier>,
    social: Arc<dyn SocialLinkDetector>,
    limiter: Arc<RateLimiter>,
    robots: Arc<RobotsCache>,
    control: CrawlControl,
    on_progress: Option<ProgressCallback>,
    on_checkpoint: Option<CheckpointCallback>,
    on_page: Option<PageCallback>,
}

impl CrawlWorker {
    /// Creates a worker with the keyword classifier and host-based social detector
    ///
    /// # Arguments
    ///
    /// * `config` - Session limits and follow flags
    /// * `fetcher` - Page fetch collaborator (also used for robots.txt)
    /// * `limiter` - Shared per-domain rate limiter
    /// * `robots` - Shared robots.txt cache
    pub fn new(
        config: CrawlConfig,
        fetcher: Arc<dyn Fetcher>,
        limiter: Arc<RateLimiter>,
        robots: Arc<RobotsCache>,
    ) -> Self {
        Self {
            config,
            fetcher,
            documents: None,
            classifier: Arc::new(KeywordClassifier::new()),
            social: Arc::new(HostSocialDetector::new()),
            limiter,
            robots,
            control: CrawlControl::new(),
            on_progress: None,
            on_checkpoint: None,
            on_page: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ContentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_social_detector(mut self, social: Arc<dyn SocialLinkDetector>) -> Self {
        self.social = social;
        self
    }

    pub fn with_document_extractor(mut self, documents: Arc<dyn DocumentExtractor>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Uses an existing control handle (e.g. one registered with a job registry)
    pub fn with_control(mut self, control: CrawlControl) -> Self {
        self.control = control;
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(&CrawlProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn on_checkpoint(mut self, callback: impl Fn(&Checkpoint) + Send + Sync + 'static) -> Self {
        self.on_checkpoint = Some(Box::new(callback));
        self
    }

    pub fn on_page(mut self, callback: impl Fn(&CrawledPage) + Send + Sync + 'static) -> Self {
        self.on_page = Some(Box::new(callback));
        self
    }

    /// Handle for signalling this worker's loop
    pub fn control(&self) -> CrawlControl {
        self.control.clone()
    }

    /// Requests the loop to end with `StopReason::Stopped`
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Requests the loop to end with `StopReason::Paused`
    pub fn pause(&self) {
        self.control.pause();
    }

    /// Runs a crawl session
    ///
    /// # Arguments
    ///
    /// * `start_url` - Seed URL; its host is the session's base site
    /// * `checkpoint` - Prior state to resume from; visited URLs are never re-fetched
    pub async fn crawl(&self, start_url: &str, checkpoint: Option<&Checkpoint>) -> CrawlOutcome {
        let base = match normalize_url(start_url) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot crawl {}: {}", start_url, e);
                return CrawlOutcome {
                    pages: Vec::new(),
                    checkpoint: checkpoint.cloned().unwrap_or_default(),
                    stop_reason: StopReason::Error,
                    progress: CrawlProgress::new(),
                };
            }
        };
        let base_host = base.host_str().unwrap_or_default().to_string();

        let mut session = Session {
            frontier: PriorityFrontier::new(
                &base_host,
                self.config.max_depth,
                Arc::clone(&self.classifier),
            ),
            progress: CrawlProgress::new(),
            pages: Vec::new(),
            external_links: Vec::new(),
            external_seen: HashSet::new(),
            current_depth: 0,
            entities_extracted: 0,
            sections_completed: Vec::new(),
        };

        if let Some(checkpoint) = checkpoint {
            self.restore(&mut session, checkpoint);
        }
        session.frontier.add_url(base.as_str(), 0);
        session.progress.pages_queued = session.frontier.len() as u32;

        info!(
            "Starting crawl of {} ({} queued, {} already visited)",
            base,
            session.frontier.len(),
            session.frontier.visited_count()
        );

        let stop_reason = self.run_loop(&mut session).await;

        session.progress.current_url = None;
        session.progress.current_activity = stop_reason.to_string();
        let final_checkpoint = session.checkpoint();
        self.emit_checkpoint(&final_checkpoint);

        info!(
            "Crawl of {} ended ({}): {} pages, {} errors, {} duplicates",
            base,
            stop_reason,
            session.progress.pages_crawled,
            session.progress.errors_count,
            session.progress.duplicates
        );

        CrawlOutcome {
            pages: session.pages,
            checkpoint: final_checkpoint,
            stop_reason,
            progress: session.progress,
        }
    }

    fn restore(&self, session: &mut Session, checkpoint: &Checkpoint) {
        session.frontier.restore_state(
            checkpoint.pages_visited.iter().cloned(),
            checkpoint.seen_urls.iter().cloned(),
            checkpoint.content_hashes.iter().cloned(),
            checkpoint.frontier.iter().cloned(),
        );

        for entry in &checkpoint.frontier {
            if let Some(host) = Url::parse(&entry.url).ok().and_then(|u| extract_domain(&u)) {
                if !session.frontier.is_base_host(&host) {
                    session.frontier.allow_host(&host);
                }
            }
        }
        for link in &checkpoint.external_links {
            session.record_external(link);
        }

        let counters = &checkpoint.progress;
        session.progress.pages_crawled = counters.pages_crawled;
        session.progress.pages_skipped = counters.pages_skipped;
        session.progress.duplicates = counters.duplicates;
        session.progress.errors_count = counters.errors_count;
        session.current_depth = checkpoint.current_depth;
        session.entities_extracted = checkpoint.entities_extracted_count;
        session.sections_completed = checkpoint.analysis_sections_completed.clone();

        debug!(
            "Restored checkpoint: {} visited, {} queued",
            checkpoint.pages_visited.len(),
            checkpoint.frontier.len()
        );
    }

    fn check_stop(&self, session: &Session, started: Instant) -> Option<StopReason> {
        if self.control.is_stopped() {
            Some(StopReason::Stopped)
        } else if self.control.is_paused() {
            Some(StopReason::Paused)
        } else if session.progress.pages_crawled >= self.config.max_pages {
            Some(StopReason::MaxPages)
        } else if started.elapsed() >= self.config.max_duration() {
            Some(StopReason::MaxTime)
        } else {
            None
        }
    }

    async fn run_loop(&self, session: &mut Session) -> StopReason {
        let started = Instant::now();
        let mut last_checkpoint = Instant::now();
        let mut pages_since_checkpoint = 0u32;

        loop {
            session.progress.elapsed_secs = started.elapsed().as_secs_f64();

            if let Some(reason) = self.check_stop(session, started) {
                return reason;
            }

            let Some(entry) = session.frontier.pop() else {
                return StopReason::Completed;
            };
            session.progress.pages_queued = session.frontier.len() as u32;

            if session.frontier.is_visited(&entry.url) {
                session.progress.pages_skipped += 1;
                continue;
            }

            session.progress.current_url = Some(entry.url.clone());
            session.progress.current_activity = "fetching".to_string();

            let page = match self.check_robots(&entry).await {
                RobotsVerdict::Disallowed => {
                    debug!("Robots disallow {}", entry.url);
                    session.progress.pages_skipped += 1;
                    CrawledPage::failed(
                        &entry.url,
                        entry.depth,
                        entry.page_type,
                        "Disallowed by robots.txt",
                    )
                }
                RobotsVerdict::Unavailable => {
                    session.progress.errors_count += 1;
                    CrawledPage::failed(
                        &entry.url,
                        entry.depth,
                        entry.page_type,
                        "Timed out waiting for rate limit",
                    )
                }
                RobotsVerdict::Allowed => {
                    let page = self.fetch_page(session, &entry).await;
                    session.progress.pages_crawled += 1;
                    pages_since_checkpoint += 1;
                    page
                }
            };

            session.frontier.mark_visited(&entry.url);
            session.current_depth = session.current_depth.max(entry.depth);
            session.progress.pages_queued = session.frontier.len() as u32;
            session.progress.elapsed_secs = started.elapsed().as_secs_f64();

            if let Some(on_page) = &self.on_page {
                on_page(&page);
            }
            session.pages.push(page);

            if let Some(on_progress) = &self.on_progress {
                on_progress(&session.progress);
            }

            if pages_since_checkpoint >= self.config.checkpoint_page_interval
                || last_checkpoint.elapsed() >= self.config.checkpoint_interval()
            {
                self.emit_checkpoint(&session.checkpoint());
                pages_since_checkpoint = 0;
                last_checkpoint = Instant::now();
            }
        }
    }

    /// Applies robots.txt to a URL, fetching the domain's file if needed
    ///
    /// The robots.txt request takes the domain's rate-limit slot, so it never
    /// overlaps a page request to the same domain.
    async fn check_robots(&self, entry: &QueuedUrl) -> RobotsVerdict {
        if !self.config.respect_robots {
            return RobotsVerdict::Allowed;
        }
        let Ok(url) = Url::parse(&entry.url) else {
            return RobotsVerdict::Allowed;
        };
        let Some(directives) = self
            .robots
            .fetch_and_parse_limited(
                self.fetcher.as_ref(),
                &url,
                &self.limiter,
                self.config.acquire_timeout(),
            )
            .await
        else {
            return RobotsVerdict::Unavailable;
        };

        if let (Some(domain), Some(delay)) = (extract_domain(&url), directives.crawl_delay()) {
            self.limiter.set_crawl_delay(&domain, delay.as_secs_f64());
        }

        if is_allowed_by(&directives, &url) {
            RobotsVerdict::Allowed
        } else {
            RobotsVerdict::Disallowed
        }
    }

    async fn fetch_page(&self, session: &mut Session, entry: &QueuedUrl) -> CrawledPage {
        let response = {
            let Some(_permit) = self
                .limiter
                .acquire_permit(&entry.url, self.config.acquire_timeout())
                .await
            else {
                session.progress.errors_count += 1;
                return CrawledPage::failed(
                    &entry.url,
                    entry.depth,
                    entry.page_type,
                    "Timed out waiting for rate limit",
                );
            };

            match (&self.documents, is_pdf_url(&entry.url)) {
                (Some(documents), true) => documents.extract(&entry.url).await,
                _ => self.fetcher.fetch(&entry.url).await,
            }
        };

        if !response.is_success() {
            session.progress.errors_count += 1;
            let error = response
                .error
                .clone()
                .unwrap_or_else(|| format!("HTTP {}", response.status_code));
            debug!("Failed {}: {}", entry.url, error);

            let mut page = CrawledPage::failed(&entry.url, entry.depth, entry.page_type, error);
            page.final_url = non_empty_or(&response.final_url, &entry.url);
            page.status_code = (response.status_code > 0).then_some(response.status_code);
            return page;
        }

        let hash = content_hash(&response.text);
        let final_url = non_empty_or(&response.final_url, &entry.url);
        let mut page = CrawledPage {
            url: entry.url.clone(),
            final_url: final_url.clone(),
            depth: entry.depth,
            page_type: self.classifier.classify(&final_url),
            status_code: Some(response.status_code),
            title: response.title.clone(),
            text: response.text.clone(),
            content_hash: Some(hash.clone()),
            is_duplicate: false,
            error: None,
            crawled_at: Utc::now(),
        };

        if !session.frontier.add_content_hash(&hash) {
            debug!("Duplicate content at {}", entry.url);
            session.progress.duplicates += 1;
            page.is_duplicate = true;
            return page;
        }

        if final_url != entry.url {
            if let Ok(redirected) = Url::parse(&final_url) {
                if extract_domain(&redirected).is_some_and(|h| session.frontier.is_base_host(&h)) {
                    session.frontier.mark_visited(&final_url);
                }
            }
        }

        self.enqueue_links(session, entry, &final_url, &response);
        page
    }

    /// Queues same-site links and followed social profiles found on a base-site page
    fn enqueue_links(
        &self,
        session: &mut Session,
        entry: &QueuedUrl,
        final_url: &str,
        response: &FetchResponse,
    ) {
        if !response.is_html() {
            return;
        }
        let Ok(base) = Url::parse(final_url) else {
            return;
        };
        let on_base_site = extract_domain(&base).is_some_and(|h| session.frontier.is_base_host(&h));
        if !on_base_site {
            return;
        }

        let next_depth = entry.depth + 1;
        let mut queued = 0;

        for link in self.classifier.extract_links(&response.body, &base) {
            let same_site = Url::parse(&link)
                .ok()
                .and_then(|u| extract_domain(&u))
                .is_some_and(|h| session.frontier.is_base_host(&h));
            if same_site && session.frontier.add_url(&link, next_depth) {
                queued += 1;
            }
        }

        for social in self.social.detect(&response.body, &base) {
            session.record_external(&social.url);
            if !social.platform.is_followed(&self.config.follow) {
                continue;
            }
            if let Some(host) = Url::parse(&social.url).ok().and_then(|u| extract_domain(&u)) {
                session.frontier.allow_host(&host);
                if session.frontier.add_url(&social.url, next_depth) {
                    queued += 1;
                }
            }
        }

        debug!("Queued {} links from {}", queued, entry.url);
    }

    fn emit_checkpoint(&self, checkpoint: &Checkpoint) {
        if let Some(on_checkpoint) = &self.on_checkpoint {
            on_checkpoint(checkpoint);
        }
    }
}

fn is_allowed_by(directives: &RobotsDirectives, url: &Url) -> bool {
    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    directives.is_allowed(&path)
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
