//! Company-Intel: resumable company website crawling and job orchestration
//!
//! This crate crawls company websites politely (robots.txt, per-domain rate limits),
//! checkpoints progress so jobs survive restarts, pauses and timeouts, and fairly
//! schedules many per-company jobs under global and per-batch concurrency limits.

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod jobs;
pub mod output;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Company-Intel operations
#[derive(Debug, Error)]
pub enum IntelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Control operation rejected: {0}")]
    Control(#[from] ControlError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline stage failed: {0}")]
    Stage(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Machine-readable reason attached to a rejected control operation
///
/// Callers use this to tell "try again later" (`LockHeld`) apart from
/// "this makes no sense in the current state" (`InvalidState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlReason {
    NotFound,
    InvalidState,
    LockHeld,
    Storage,
}

impl ControlReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::LockHeld => "lock_held",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ControlReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by job and batch control operations
///
/// A rejected operation never leaves partial state behind.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("cannot {action} {kind} {id} while it is {state}")]
    InvalidState {
        kind: &'static str,
        id: String,
        action: &'static str,
        state: String,
    },

    #[error("lock {key} is held by another worker")]
    LockHeld { key: String },

    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

impl ControlError {
    /// Returns the machine-readable reason for this rejection
    pub fn reason(&self) -> ControlReason {
        match self {
            Self::NotFound { .. } => ControlReason::NotFound,
            Self::InvalidState { .. } => ControlReason::InvalidState,
            Self::LockHeld { .. } => ControlReason::LockHeld,
            Self::Storage(_) => ControlReason::Storage,
        }
    }

    /// Returns true if retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockHeld { .. } | Self::Storage(_))
    }
}

/// Result type alias for Company-Intel operations
pub type Result<T> = std::result::Result<T, IntelError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

/// Result type alias for job and batch control operations
pub type ControlResult<T> = std::result::Result<T, ControlError>;

// Re-export commonly used types
pub use batch::BatchScheduler;
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::Config;
pub use crawler::{CrawlConfig, CrawlWorker, PriorityFrontier, RateLimiter, StopReason};
pub use jobs::{JobLifecycle, PipelineRunner};
pub use robots::{RobotsCache, RobotsDirectives};
pub use state::{BatchStatus, JobPhase, JobStatus};
pub use url::{extract_domain, normalize_url};
