use crate::pipeline::job::JobStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Share of the job-level percentage owned by each stage.
const EXTRACTION_WEIGHT: f64 = 15.0;
const RECOGNITION_WEIGHT: f64 = 75.0;
const AGGREGATION_WEIGHT: f64 = 10.0;

/// Highest value reported before the job reaches a successful terminal status.
const MAX_PARTIAL: f64 = 99.9;

/// Limits how often progress updates are delivered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    /// Minimum growth in percentage points that triggers an update.
    pub min_delta: f64,
    /// Minimum time between updates that grow by less than `min_delta`.
    pub min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delta: 1.0,
            min_interval: Duration::from_millis(100),
        }
    }
}

/// One progress message for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percentage: f64,
    pub stage: JobStatus,
    pub message: String,
}

/// Job-level percentage for `stage` at `fraction` (0.0..=1.0) of that stage.
pub fn stage_percentage(stage: JobStatus, fraction: f64) -> f64 {
    let fraction = fraction.clamp(0.0, 1.0);
    match stage {
        JobStatus::Idle | JobStatus::Validating => 0.0,
        JobStatus::Extracting => EXTRACTION_WEIGHT * fraction,
        JobStatus::Recognizing => EXTRACTION_WEIGHT + RECOGNITION_WEIGHT * fraction,
        JobStatus::Aggregating => {
            EXTRACTION_WEIGHT + RECOGNITION_WEIGHT + AGGREGATION_WEIGHT * fraction
        }
        JobStatus::Completed | JobStatus::CompletedWithErrors => 100.0,
        JobStatus::Cancelled | JobStatus::Failed => 0.0,
    }
}

/// Folds stage-local progress into one non-decreasing, throttled percentage.
pub struct ProgressAggregator {
    throttle: ThrottleConfig,
    current: f64,
    last_emitted: Option<(f64, Instant, JobStatus)>,
    finished: bool,
}

impl ProgressAggregator {
    pub fn new(throttle: ThrottleConfig) -> Self {
        Self {
            throttle,
            current: 0.0,
            last_emitted: None,
            finished: false,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// Record progress and return an update if one is due.
    pub fn update(
        &mut self,
        stage: JobStatus,
        fraction: f64,
        message: impl Into<String>,
    ) -> Option<ProgressUpdate> {
        if self.finished {
            return None;
        }

        let pct = stage_percentage(stage, fraction).min(MAX_PARTIAL);
        self.current = self.current.max(pct);

        let due = match self.last_emitted {
            None => true,
            Some((last_pct, last_at, last_stage)) => {
                last_stage != stage
                    || self.current - last_pct >= self.throttle.min_delta
                    || (self.current > last_pct && last_at.elapsed() >= self.throttle.min_interval)
            }
        };
        if !due {
            return None;
        }

        self.last_emitted = Some((self.current, Instant::now(), stage));
        Some(ProgressUpdate {
            percentage: self.current,
            stage,
            message: message.into(),
        })
    }

    /// The 100 % update. Produced at most once, and only for successful statuses.
    pub fn finish(&mut self, status: JobStatus, message: impl Into<String>) -> Option<ProgressUpdate> {
        if self.finished || !status.is_success() {
            return None;
        }
        self.finished = true;
        self.current = 100.0;
        self.last_emitted = Some((100.0, Instant::now(), status));
        Some(ProgressUpdate {
            percentage: 100.0,
            stage: status,
            message: message.into(),
        })
    }
}

/// Latest percentage, readable from any thread while the worker writes it.
#[derive(Debug, Clone, Default)]
pub struct SharedProgress(Arc<AtomicU64>);

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, pct: f64) {
        self.0.store(pct.to_bits(), Ordering::Release);
    }
}
