//! Notifications sent from job execution to the batch scheduler

use crate::state::JobStatus;
use tokio::sync::mpsc;

/// Something the scheduler needs to react to
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A job reached `completed` or `failed`
    Finished {
        job_id: i64,
        batch_id: Option<String>,
        status: JobStatus,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> i64 {
        match self {
            Self::Finished { job_id, .. } => *job_id,
        }
    }
}

pub type JobEventSender = mpsc::UnboundedSender<JobEvent>;
pub type JobEventReceiver = mpsc::UnboundedReceiver<JobEvent>;

/// Creates the job event channel
pub fn job_events() -> (JobEventSender, JobEventReceiver) {
    mpsc::unbounded_channel()
}
