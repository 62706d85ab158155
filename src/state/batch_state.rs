use std::fmt;

/// Status of a batch of company jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchStatus {
    /// Created, not yet started
    Pending,

    /// Admitting member jobs
    Processing,

    /// No new admissions; running jobs continue
    Paused,

    /// Every member job reached a terminal state
    Completed,

    /// Cancelled by a caller
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Checks the batch state machine
    ///
    /// `pending → processing → {paused, completed, cancelled}`, `paused → processing`,
    /// and pending or paused batches may be cancelled.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Paused)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Cancelled)
                | (Self::Paused, Self::Processing)
                | (Self::Paused, Self::Cancelled)
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Processing,
            Self::Paused,
            Self::Completed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
