pub mod job;
pub mod progress;

pub use job::{CancelFlag, Job, JobStatus};
pub use progress::{ProgressAggregator, ProgressUpdate, SharedProgress, ThrottleConfig};

use crate::audio::{plan_chunks, AudioExtractor};
use crate::error::{ErrorKind, Result, TranscribeError};
use crate::request::{Diagnostics, TranscriptionRequest};
use crate::resources::{precheck_disk_space, MemoryMonitor, TempResources};
use crate::transcribe::{ChunkRunner, RunnerOutcome, SpeechRecognizer};
use crate::transcript::{write_result, TranscriptionResult};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Message sent from a running job to its handle.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Progress(ProgressUpdate),
    /// Always the last event of a job.
    Finished(JobOutcome),
}

/// Categorized error handed to the caller of a failed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub id: Uuid,
    pub status: JobStatus,
    pub output: PathBuf,
    pub result: Option<TranscriptionResult>,
    pub error: Option<JobError>,
    pub elapsed: Duration,
}

/// Caller-side view of a submitted job.
pub struct JobHandle {
    id: Uuid,
    cancel: CancelFlag,
    status: watch::Receiver<JobStatus>,
    progress: SharedProgress,
    events: mpsc::UnboundedReceiver<JobEvent>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Latest job-level percentage.
    pub fn progress(&self) -> f64 {
        self.progress.get()
    }

    /// Ask the job to stop after its current unit of work.
    pub fn cancel(&self) {
        if self.status().is_terminal() {
            return;
        }
        if !self.cancel.is_cancelled() {
            info!("Cancellation requested for job {}", self.id);
        }
        self.cancel.cancel();
    }

    /// A clone of the job's cancel flag, e.g. for a signal handler.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Next progress or terminal event; `None` once the job is gone.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Drain events until the job finishes.
    pub async fn wait(mut self) -> JobOutcome {
        while let Some(event) = self.next_event().await {
            if let JobEvent::Finished(outcome) = event {
                return outcome;
            }
        }

        // The worker task was dropped without reporting, e.g. at runtime shutdown
        JobOutcome {
            id: self.id,
            status: JobStatus::Failed,
            output: PathBuf::new(),
            result: None,
            error: Some(JobError {
                kind: ErrorKind::Io,
                message: "Transcription worker stopped unexpectedly".to_string(),
            }),
            elapsed: Duration::ZERO,
        }
    }
}

/// Clears the orchestrator's busy flag when the job is done with it.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs transcription jobs, one at a time, on a background task.
pub struct Orchestrator {
    extractor: Arc<dyn AudioExtractor>,
    recognizer: Arc<dyn SpeechRecognizer>,
    busy: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(extractor: Arc<dyn AudioExtractor>, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            extractor,
            recognizer,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a job is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Validate `request` and start it in the background.
    ///
    /// Fails with [`TranscribeError::Busy`] while another job is active and
    /// with [`TranscribeError::Validation`] for a bad request; in both cases
    /// nothing is started. Must be called from within a Tokio runtime.
    pub fn submit(&self, request: TranscriptionRequest) -> Result<JobHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TranscribeError::Config(format!("No async runtime available: {e}")))?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TranscribeError::Busy);
        }
        let busy = BusyGuard(self.busy.clone());

        request.validate()?;

        let id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(JobStatus::Idle);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();
        let progress = SharedProgress::new();

        info!(
            "Submitting job {} for {} -> {}",
            id,
            request.source.display(),
            request.output.display()
        );

        let worker = Worker {
            reporter: Reporter {
                aggregator: ProgressAggregator::new(request.config.throttle),
                shared: progress.clone(),
                events: event_tx,
            },
            memory: MemoryMonitor::new(request.config.memory_threshold),
            job: Job::new(id, request, status_tx),
            extractor: self.extractor.clone(),
            recognizer: self.recognizer.clone(),
            cancel: cancel.clone(),
        };
        runtime.spawn(worker.run(busy).instrument(info_span!("job", id = %id)));

        Ok(JobHandle {
            id,
            cancel,
            status: status_rx,
            progress,
            events: event_rx,
        })
    }

    /// Cancel `handle`'s job. Idempotent; no effect once the job is terminal.
    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
    }
}

/// Feeds progress into the aggregator and forwards what passes the throttle.
struct Reporter {
    aggregator: ProgressAggregator,
    shared: SharedProgress,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl Reporter {
    fn report(&mut self, stage: JobStatus, fraction: f64, message: impl Into<String>) {
        if let Some(update) = self.aggregator.update(stage, fraction, message) {
            let _ = self.events.send(JobEvent::Progress(update));
        }
        self.shared.set(self.aggregator.current());
    }

    fn finish(&mut self, outcome: JobOutcome) {
        let summary = format!("{}", outcome.status);
        if let Some(update) = self.aggregator.finish(outcome.status, summary) {
            self.shared.set(update.percentage);
            let _ = self.events.send(JobEvent::Progress(update));
        }
        let _ = self.events.send(JobEvent::Finished(outcome));
    }
}

/// Background side of a job. Owns the job state while it is active.
struct Worker {
    job: Job,
    extractor: Arc<dyn AudioExtractor>,
    recognizer: Arc<dyn SpeechRecognizer>,
    cancel: CancelFlag,
    reporter: Reporter,
    memory: MemoryMonitor,
}

impl Worker {
    async fn run(mut self, busy: BusyGuard) {
        // Temp files are dropped while unwinding, so only the status is left to report
        let result = AssertUnwindSafe(self.execute())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(TranscribeError::Panicked(panic_message(payload))));

        // Terminal status, then the busy flag, then Finished
        let outcome = self.conclude(result);
        drop(busy);
        self.reporter.finish(outcome);
    }

    /// All stages. Temp files are gone by the time this returns.
    async fn execute(&mut self) -> Result<TranscriptionResult> {
        self.job.advance(JobStatus::Validating);
        self.reporter
            .report(JobStatus::Validating, 0.0, "Checking disk space");

        let config = self.job.request.config.clone();
        let source = self.job.request.source.clone();
        let temp_root = config.temp_dir.clone();
        let factor = config.disk_space_factor;
        tokio::task::spawn_blocking(move || precheck_disk_space(&source, &temp_root, factor))
            .await
            .map_err(|e| TranscribeError::Io(std::io::Error::other(e)))??;

        let mut resources = TempResources::create(&config.temp_dir)?;
        let result = self.stages(&resources).await;
        resources.release_all();
        result
    }

    async fn stages(&mut self, resources: &TempResources) -> Result<TranscriptionResult> {
        let config = self.job.request.config.clone();
        let source = self.job.request.source.clone();
        let language = self.job.request.language.clone();

        self.checkpoint()?;
        self.job.advance(JobStatus::Extracting);
        self.reporter
            .report(JobStatus::Extracting, 0.0, "Extracting audio");

        let audio = resources.allocate("audio.wav");
        let duration = self.extractor.extract_audio(&source, &audio).await?;
        if duration.is_zero() {
            return Err(TranscribeError::NoAudioTrack(source.display().to_string()));
        }
        self.job.audio_duration = duration;
        self.reporter.report(
            JobStatus::Extracting,
            1.0,
            format!("Extracted {:.1}s of audio", duration.as_secs_f64()),
        );
        self.memory.check("after extraction");

        self.checkpoint()?;
        self.job.advance(JobStatus::Recognizing);
        let spans = plan_chunks(duration, config.chunk_duration);
        let total = spans.len();
        self.reporter.report(
            JobStatus::Recognizing,
            0.0,
            format!("Recognizing {} chunks", total),
        );

        let runner = ChunkRunner::new(self.recognizer.clone(), resources, &audio, &self.cancel)
            .with_language(language.as_deref())
            .with_retry(config.retry)
            .with_concurrency(config.concurrency);
        let reporter = &mut self.reporter;
        let memory = &mut self.memory;
        let outcome = runner
            .run(spans, |done, total| {
                reporter.report(
                    JobStatus::Recognizing,
                    done as f64 / total as f64,
                    format!("Recognized chunk {}/{}", done, total),
                );
                memory.check(&format!("after chunk {}/{}", done, total));
            })
            .await?;

        let chunks = match outcome {
            RunnerOutcome::Finished(chunks) => chunks,
            RunnerOutcome::Cancelled(chunks) => {
                self.job.chunks = chunks;
                return Err(TranscribeError::Cancelled);
            }
        };
        resources.release(&audio);

        if chunks.iter().all(|c| !c.is_success()) {
            let first = chunks
                .iter()
                .find_map(|c| c.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_default();
            self.job.chunks = chunks;
            return Err(TranscribeError::Recognition(format!(
                "All {} chunks failed (first error: {})",
                total, first
            )));
        }

        self.checkpoint()?;
        self.job.advance(JobStatus::Aggregating);
        self.reporter
            .report(JobStatus::Aggregating, 0.0, "Aggregating transcript");

        let result = TranscriptionResult::aggregate(
            chunks.clone(),
            &config.join,
            duration,
            self.job.elapsed(),
            language,
        );
        self.job.chunks = chunks;
        write_result(
            &result,
            self.job.request.format,
            &config.join,
            &self.job.request.output,
        )?;
        self.reporter
            .report(JobStatus::Aggregating, 1.0, "Transcript written");

        Ok(result)
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Job {} cancelled during {}", self.job.id, self.job.status());
            return Err(TranscribeError::Cancelled);
        }
        Ok(())
    }

    /// Move to the terminal status matching `result`.
    fn conclude(&mut self, result: Result<TranscriptionResult>) -> JobOutcome {
        let stage = self.job.status();
        let (status, result, error) = match result {
            Ok(result) => {
                let status = if result.has_errors() {
                    JobStatus::CompletedWithErrors
                } else {
                    JobStatus::Completed
                };
                (status, Some(result), None)
            }
            Err(TranscribeError::Cancelled) => (JobStatus::Cancelled, None, None),
            Err(e) => {
                warn!("Job {} failed during {}: {}", self.job.id, stage, e);
                let error = JobError {
                    kind: e.kind(),
                    message: describe_error(&e, self.job.request.diagnostics, &self.job, stage),
                };
                (JobStatus::Failed, None, Some(error))
            }
        };

        self.job.advance(status);
        info!(
            "Job {} finished: {} in {:.2}s",
            self.job.id,
            status,
            self.job.elapsed().as_secs_f64()
        );

        JobOutcome {
            id: self.job.id,
            status,
            output: self.job.request.output.clone(),
            result,
            error,
            elapsed: self.job.elapsed(),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Human-readable message for a failed job.
fn describe_error(
    err: &TranscribeError,
    diagnostics: Diagnostics,
    job: &Job,
    stage: JobStatus,
) -> String {
    match diagnostics {
        Diagnostics::Normal => err.to_string(),
        Diagnostics::Verbose => {
            let mut message = format!(
                "{err}\n  job: {}\n  stage: {}\n  source: {}\n  kind: {}",
                job.id,
                stage,
                job.request.source.display(),
                err.kind()
            );
            if !job.audio_duration.is_zero() {
                message.push_str(&format!(
                    "\n  audio duration: {:.1}s",
                    job.audio_duration.as_secs_f64()
                ));
            }
            if !job.chunks.is_empty() {
                let failed = job.chunks.iter().filter(|c| !c.is_success()).count();
                message.push_str(&format!(
                    "\n  chunks: {} processed, {} failed",
                    job.chunks.len(),
                    failed
                ));
            }
            message
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;

    #[test]
    fn test_describe_error_levels() {
        let (tx, _rx) = watch::channel(JobStatus::Idle);
        let request = TranscriptionRequest::new("/videos/talk.mp4", "/out/talk.txt", OutputFormat::Text);
        let job = Job::new(Uuid::new_v4(), request, tx);
        let err = TranscribeError::Extraction("bad header".to_string());

        let normal = describe_error(&err, Diagnostics::Normal, &job, JobStatus::Extracting);
        assert_eq!(normal, "Audio extraction failed: bad header");

        let verbose = describe_error(&err, Diagnostics::Verbose, &job, JobStatus::Extracting);
        assert!(verbose.starts_with(&normal));
        assert!(verbose.contains("stage: Extracting audio"));
        assert!(verbose.contains(&job.id.to_string()));
        assert!(verbose.contains("kind: extraction"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("recognizer blew up")), "recognizer blew up");
        assert_eq!(panic_message(Box::new(format!("chunk {}", 3))), "chunk 3");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }

    #[test]
    fn test_busy_guard_releases() {
        let busy = Arc::new(AtomicBool::new(true));
        drop(BusyGuard(busy.clone()));
        assert!(!busy.load(Ordering::Acquire));
    }
}
