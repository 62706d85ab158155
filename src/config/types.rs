use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Company-Intel
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub output: OutputConfig,
}

/// Per-job crawl limits and behavior
///
/// Immutable for the lifetime of a crawl session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Maximum number of pages fetched per session
    pub max_pages: u32,

    /// Maximum link depth from the start URL (start URL is depth 0)
    pub max_depth: u32,

    /// Wall-clock budget for one crawl session
    pub max_duration_secs: u64,

    /// Whether robots.txt directives are enforced
    #[serde(default = "default_true")]
    pub respect_robots: bool,

    /// Token bucket refill rate per domain
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Token bucket capacity per domain
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Upper bound on a blocking rate-limiter acquire
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Emit a checkpoint after this many pages
    #[serde(default = "default_checkpoint_pages")]
    pub checkpoint_page_interval: u32,

    /// Emit a checkpoint after this many seconds
    #[serde(default = "default_checkpoint_secs")]
    pub checkpoint_interval_secs: u64,

    /// Which social networks may be followed off-site
    #[serde(default)]
    pub follow: SocialFollow,
}

impl CrawlConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_depth: 3,
            max_duration_secs: 600,
            respect_robots: true,
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            acquire_timeout_secs: default_acquire_timeout(),
            checkpoint_page_interval: default_checkpoint_pages(),
            checkpoint_interval_secs: default_checkpoint_secs(),
            follow: SocialFollow::default(),
        }
    }
}

/// Per-social-network follow flags
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct SocialFollow {
    #[serde(default)]
    pub linkedin: bool,
    #[serde(default)]
    pub twitter: bool,
    #[serde(default)]
    pub facebook: bool,
    #[serde(default)]
    pub instagram: bool,
    #[serde(default)]
    pub youtube: bool,
    #[serde(default)]
    pub github: bool,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also the product token matched in robots.txt
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the full User-Agent header value
    ///
    /// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Job lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobsConfig {
    /// Active-time budget for one job (paused time excluded)
    pub timeout_secs: u64,

    /// In-progress jobs not updated for this long are considered abandoned
    pub stale_after_secs: u64,

    /// Lifetime of the pause/resume lease
    pub lock_ttl_secs: u64,

    /// How long a fetched robots.txt stays cached
    pub robots_cache_ttl_secs: u64,
}

impl JobsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn robots_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_cache_ttl_secs)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            stale_after_secs: 900,
            lock_ttl_secs: 30,
            robots_cache_ttl_secs: 86_400,
        }
    }
}

/// Batch scheduler configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Maximum number of in-progress jobs across all batches
    pub global_concurrency: u32,

    /// Interval between scheduling rounds in the scheduler loop
    pub poll_interval_secs: u64,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            global_concurrency: 4,
            poll_interval_secs: 5,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_true() -> bool {
    true
}

fn default_requests_per_second() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_checkpoint_pages() -> u32 {
    10
}

fn default_checkpoint_secs() -> u64 {
    60
}
