//! Crawler module for politely crawling one company site
//!
//! This module contains the core crawling logic, including:
//! - Fetch, classification and social-link collaborators with default implementations
//! - HTML parsing and link extraction
//! - Per-domain rate limiting
//! - The priority frontier and the crawl worker loop

mod classifier;
mod fetcher;
mod frontier;
mod parser;
mod rate_limiter;
mod social;
mod types;
mod worker;

pub use classifier::{ContentClassifier, KeywordClassifier, PageType};
pub use fetcher::{build_http_client, DocumentExtractor, FetchResponse, Fetcher, HttpFetcher};
pub use frontier::{FrontierSnapshot, PriorityFrontier, QueuedUrl};
pub use parser::{collapse_whitespace, extract_links_from_html, parse_html, ParsedPage};
pub use rate_limiter::{DomainPermit, RateLimiter};
pub use social::{HostSocialDetector, SocialLink, SocialLinkDetector, SocialPlatform};
pub use types::{CrawlControl, CrawlProgress, CrawledPage, StopReason};
pub use worker::{
    content_hash, CheckpointCallback, CrawlOutcome, CrawlWorker, PageCallback, ProgressCallback,
};

pub use crate::config::CrawlConfig;
