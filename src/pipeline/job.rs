use crate::request::TranscriptionRequest;
use crate::transcribe::ChunkResult;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of a transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Validating,
    Extracting,
    Recognizing,
    Aggregating,
    Completed,
    CompletedWithErrors,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::CompletedWithErrors
                | JobStatus::Cancelled
                | JobStatus::Failed
        )
    }

    /// Terminal statuses that produced a transcript.
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::CompletedWithErrors)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Idle => 0,
            JobStatus::Validating => 1,
            JobStatus::Extracting => 2,
            JobStatus::Recognizing => 3,
            JobStatus::Aggregating => 4,
            JobStatus::Completed
            | JobStatus::CompletedWithErrors
            | JobStatus::Cancelled
            | JobStatus::Failed => 5,
        }
    }

    /// Transitions only move forward. `Cancelled` and `Failed` are reachable
    /// from every non-terminal state; the successful terminals only from
    /// `Aggregating`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Cancelled | JobStatus::Failed => true,
            JobStatus::Completed | JobStatus::CompletedWithErrors => {
                *self == JobStatus::Aggregating
            }
            _ => next.rank() == self.rank() + 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Idle => "Idle",
            JobStatus::Validating => "Validating",
            JobStatus::Extracting => "Extracting audio",
            JobStatus::Recognizing => "Recognizing speech",
            JobStatus::Aggregating => "Writing transcript",
            JobStatus::Completed => "Completed",
            JobStatus::CompletedWithErrors => "Completed with errors",
            JobStatus::Cancelled => "Cancelled",
            JobStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Cooperative cancellation flag shared between a job and its callers.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Worker-owned state of one job.
pub struct Job {
    pub id: Uuid,
    pub request: TranscriptionRequest,
    pub chunks: Vec<ChunkResult>,
    pub audio_duration: Duration,
    pub started: Instant,
    status: JobStatus,
    status_tx: watch::Sender<JobStatus>,
}

impl Job {
    pub fn new(id: Uuid, request: TranscriptionRequest, status_tx: watch::Sender<JobStatus>) -> Self {
        let status = *status_tx.borrow();
        Self {
            id,
            request,
            chunks: Vec::new(),
            audio_duration: Duration::ZERO,
            started: Instant::now(),
            status,
            status_tx,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Move to `next` and publish it. Refused transitions leave the job untouched.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!("Ignoring transition {:?} -> {:?}", self.status, next);
            return false;
        }
        debug!("Job {}: {:?} -> {:?}", self.id, self.status, next);
        self.status = next;
        self.status_tx.send_replace(next);
        true
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
