use crate::crawler::{CrawlProgress, FrontierSnapshot, QueuedUrl};
use crate::state::JobPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current persisted checkpoint format
///
/// Version 1 stored only URL lists and counts; version 2 adds the frontier
/// entries, the seen set and the progress counters.
pub const CHECKPOINT_VERSION: u32 = 2;

/// Durable subset of `CrawlProgress`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressCounters {
    pub pages_crawled: u32,
    pub pages_skipped: u32,
    pub duplicates: u32,
    pub errors_count: u32,
    pub external_links: u32,
}

impl From<&CrawlProgress> for ProgressCounters {
    fn from(progress: &CrawlProgress) -> Self {
        Self {
            pages_crawled: progress.pages_crawled,
            pages_skipped: progress.pages_skipped,
            duplicates: progress.duplicates,
            errors_count: progress.errors_count,
            external_links: progress.external_links,
        }
    }
}

/// Resumable snapshot of one job's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub pages_visited: Vec<String>,
    pub pages_queued: Vec<String>,
    pub content_hashes: Vec<String>,
    pub seen_urls: Vec<String>,
    /// Remaining frontier entries in pop order
    pub frontier: Vec<QueuedUrl>,
    pub progress: ProgressCounters,
    pub external_links: Vec<String>,
    pub current_depth: u32,
    pub entities_extracted_count: u64,
    pub analysis_sections_completed: Vec<String>,
}

impl Checkpoint {
    /// An empty checkpoint stamped with the current time
    pub fn new() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            timestamp: Utc::now(),
            pages_visited: Vec::new(),
            pages_queued: Vec::new(),
            content_hashes: Vec::new(),
            seen_urls: Vec::new(),
            frontier: Vec::new(),
            progress: ProgressCounters::default(),
            external_links: Vec::new(),
            current_depth: 0,
            entities_extracted_count: 0,
            analysis_sections_completed: Vec::new(),
        }
    }

    /// Builds a crawl checkpoint from the frontier state and live counters
    pub fn from_frontier(
        snapshot: FrontierSnapshot,
        progress: &CrawlProgress,
        external_links: Vec<String>,
        current_depth: u32,
    ) -> Self {
        Self {
            pages_queued: snapshot.queued.iter().map(|q| q.url.clone()).collect(),
            pages_visited: snapshot.visited,
            content_hashes: snapshot.content_hashes,
            seen_urls: snapshot.seen,
            frontier: snapshot.queued,
            progress: ProgressCounters::from(progress),
            external_links,
            current_depth,
            ..Self::new()
        }
    }

    /// True if any work has been recorded
    pub fn is_resumable(&self) -> bool {
        !self.pages_visited.is_empty()
            || self.entities_extracted_count > 0
            || !self.analysis_sections_completed.is_empty()
    }

    /// The phase a resumed job should continue from
    ///
    /// Completed analysis sections or extracted entities mean analysis;
    /// visited pages without entities mean extraction; otherwise crawl again.
    pub fn resume_phase(&self) -> JobPhase {
        if !self.analysis_sections_completed.is_empty() || self.entities_extracted_count > 0 {
            JobPhase::Analyzing
        } else if !self.pages_visited.is_empty() {
            JobPhase::Extracting
        } else {
            JobPhase::Crawling
        }
    }

    pub fn is_section_done(&self, section: &str) -> bool {
        self.analysis_sections_completed.iter().any(|s| s == section)
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}
