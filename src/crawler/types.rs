//! Data exchanged between the crawl loop and its caller

use crate::crawler::classifier::PageType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of crawling one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledPage {
    /// The URL taken from the frontier
    pub url: String,

    /// URL after redirects
    pub final_url: String,

    pub depth: u32,

    pub page_type: PageType,

    /// HTTP status, if a response was received
    pub status_code: Option<u16>,

    pub title: Option<String>,

    /// Extracted text
    pub text: String,

    /// Normalized content hash (None for failed pages)
    pub content_hash: Option<String>,

    /// Same content as a page already crawled in this session
    pub is_duplicate: bool,

    /// Page-level error (fetch failure or robots policy)
    pub error: Option<String>,

    pub crawled_at: DateTime<Utc>,
}

impl CrawledPage {
    /// Builds a failed page record
    pub fn failed(url: &str, depth: u32, page_type: PageType, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            depth,
            page_type,
            status_code: None,
            title: None,
            text: String::new(),
            content_hash: None,
            is_duplicate: false,
            error: Some(error.into()),
            crawled_at: Utc::now(),
        }
    }

    /// True for pages that carry new content
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.is_duplicate
    }
}

/// Live counters for one crawl session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlProgress {
    /// Fetch attempts (successful, failed and duplicate)
    pub pages_crawled: u32,
    pub pages_queued: u32,
    /// Already-visited URLs popped again, and robots-disallowed URLs
    pub pages_skipped: u32,
    pub duplicates: u32,
    pub errors_count: u32,
    pub external_links: u32,
    pub current_url: Option<String>,
    pub current_activity: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl CrawlProgress {
    pub fn new() -> Self {
        Self {
            pages_crawled: 0,
            pages_queued: 0,
            pages_skipped: 0,
            duplicates: 0,
            errors_count: 0,
            external_links: 0,
            current_url: None,
            current_activity: "idle".to_string(),
            started_at: Utc::now(),
            elapsed_secs: 0.0,
        }
    }
}

impl Default for CrawlProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a crawl session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// Frontier exhausted
    Completed,
    MaxPages,
    MaxTime,
    /// External stop signal
    Stopped,
    /// External pause signal
    Paused,
    /// The session could not start (e.g. unusable start URL)
    Error,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxPages => "max_pages",
            Self::MaxTime => "max_time",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    /// True when the crawl finished on its own and the pipeline may advance
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::MaxPages | Self::MaxTime)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cooperative stop/pause flags, checked once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct CrawlControl {
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
}

impl CrawlControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }
}
