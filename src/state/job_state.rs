//! Job status and phase definitions
//!
//! A job's status says whether it is running; its phase says how far through
//! the crawl → extract → analyze → generate pipeline it has got.

use std::fmt;

/// Lifecycle status of a company job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Waiting for batch admission
    Pending,

    /// Admitted and running (or owned by a worker that will run it)
    InProgress,

    /// Paused by a caller; `paused_at` is set
    Paused,

    // ===== Terminal States =====
    /// All four phases finished
    Completed,

    /// Failed, cancelled, timed out or abandoned
    Failed,
}

impl JobStatus {
    /// Returns true if no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the job holds (or may reclaim) a concurrency slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress | Self::Paused)
    }

    /// Checks the job status state machine
    ///
    /// `pending → in_progress → {paused, completed, failed}`, `paused → in_progress`.
    /// Pending and paused jobs may also fail (batch cancellation, timeout).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Paused)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::Paused, Self::InProgress)
                | (Self::Paused, Self::Failed)
        )
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all job statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::InProgress,
            Self::Paused,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Pipeline phase of a company job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobPhase {
    Queued,
    Crawling,
    Extracting,
    Analyzing,
    Generating,
    Completed,
}

impl JobPhase {
    /// The phase that follows this one
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Queued => Some(Self::Crawling),
            Self::Crawling => Some(Self::Extracting),
            Self::Extracting => Some(Self::Analyzing),
            Self::Analyzing => Some(Self::Generating),
            Self::Generating => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Returns true for the phases a worker actually executes
    pub fn is_runnable(&self) -> bool {
        matches!(
            self,
            Self::Crawling | Self::Extracting | Self::Analyzing | Self::Generating
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Crawling => "crawling",
            Self::Extracting => "extracting",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Completed => "completed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "crawling" => Some(Self::Crawling),
            "extracting" => Some(Self::Extracting),
            "analyzing" => Some(Self::Analyzing),
            "generating" => Some(Self::Generating),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
