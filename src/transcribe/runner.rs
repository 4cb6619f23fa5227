use crate::audio::{write_chunk, AudioChunk, ChunkSpan};
use crate::error::{Result, TranscribeError};
use crate::pipeline::CancelFlag;
use crate::resources::TempResources;
use crate::transcribe::{
    recognize_with_retry, ChunkResult, RecognitionError, RecognitionErrorKind, RetryOutcome,
    RetryPolicy, SpeechRecognizer,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// How the chunk loop ended.
#[derive(Debug)]
pub enum RunnerOutcome {
    /// Every chunk has a result, in index order.
    Finished(Vec<ChunkResult>),
    /// Cancellation was observed; holds the chunks that did finish.
    Cancelled(Vec<ChunkResult>),
}

/// Runs recognition over every planned chunk of one extracted audio file.
///
/// Each chunk is cut from the audio into its own temp file, recognized with
/// retries and released again before its result is reported. Up to
/// `concurrency` chunks are in flight; results are always returned in
/// index order.
pub struct ChunkRunner<'a> {
    recognizer: Arc<dyn SpeechRecognizer>,
    resources: &'a TempResources,
    audio: &'a Path,
    language: Option<&'a str>,
    retry: RetryPolicy,
    concurrency: usize,
    cancel: &'a CancelFlag,
}

impl<'a> ChunkRunner<'a> {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        resources: &'a TempResources,
        audio: &'a Path,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            recognizer,
            resources,
            audio,
            language: None,
            retry: RetryPolicy::default(),
            concurrency: 1,
            cancel,
        }
    }

    pub fn with_language(mut self, language: Option<&'a str>) -> Self {
        self.language = language;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Process all `spans`. `on_done(completed, total)` runs after each chunk.
    ///
    /// An IO failure while cutting a chunk aborts the whole run. Recognition
    /// failures do not: they are recorded on the chunk's result.
    pub async fn run(
        &self,
        spans: Vec<ChunkSpan>,
        mut on_done: impl FnMut(usize, usize),
    ) -> Result<RunnerOutcome> {
        let total = spans.len();
        let start = Instant::now();
        info!(
            "Recognizing {} chunks with {} (concurrency: {})",
            total,
            self.recognizer.name(),
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut futures = FuturesUnordered::new();
        for span in spans {
            let sem = semaphore.clone();
            futures.push(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| TranscribeError::Io(std::io::Error::other(e)))?;
                self.process(span).await
            });
        }

        let mut results: Vec<ChunkResult> = Vec::with_capacity(total);
        let mut cancelled = false;
        while let Some(result) = futures.next().await {
            match result? {
                Some(chunk_result) => {
                    results.push(chunk_result);
                    on_done(results.len(), total);
                }
                None => cancelled = true,
            }
        }

        results.sort_by_key(|r| r.index);

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            "Recognized {}/{} chunks in {:.2}s ({} failed)",
            results.len() - failed,
            total,
            start.elapsed().as_secs_f64(),
            failed
        );

        if cancelled || (self.cancel.is_cancelled() && results.len() < total) {
            Ok(RunnerOutcome::Cancelled(results))
        } else {
            Ok(RunnerOutcome::Finished(results))
        }
    }

    /// Cut, recognize and release one chunk. `None` means the job was
    /// cancelled before the chunk produced a result.
    async fn process(&self, span: ChunkSpan) -> Result<Option<ChunkResult>> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let path = self
            .resources
            .allocate(&format!("chunk_{:04}.wav", span.index));
        let frames = match self.materialize(span, path.clone()).await {
            Ok(frames) => frames,
            Err(e) => {
                self.resources.release(&path);
                return Err(e);
            }
        };
        let chunk = AudioChunk::new(span, path);

        let result = if frames == 0 {
            warn!("Chunk {} has no audio samples", chunk.index);
            Some(ChunkResult::failure(
                &chunk,
                RecognitionError::new(
                    RecognitionErrorKind::EmptyChunk,
                    format!("No audio at {:.1}s", chunk.offset.as_secs_f64()),
                ),
                0,
            ))
        } else {
            debug!(
                "Recognizing chunk {} ({:.1}s - {:.1}s)",
                chunk.index,
                chunk.offset.as_secs_f64(),
                chunk.end().as_secs_f64()
            );
            match recognize_with_retry(
                self.recognizer.as_ref(),
                &chunk,
                self.language,
                &self.retry,
                self.cancel,
            )
            .await
            {
                RetryOutcome::Recognized {
                    recognition,
                    attempts,
                } => Some(ChunkResult::success(&chunk, recognition, attempts)),
                RetryOutcome::Failed { error, attempts } => {
                    warn!(
                        "Chunk {} failed after {} attempt(s): {}",
                        chunk.index, attempts, error
                    );
                    Some(ChunkResult::failure(&chunk, error, attempts))
                }
                RetryOutcome::Cancelled { attempts } => {
                    debug!("Chunk {} abandoned after {} attempt(s)", chunk.index, attempts);
                    None
                }
            }
        };

        self.resources.release(&chunk.path);
        Ok(result)
    }

    async fn materialize(&self, span: ChunkSpan, output: PathBuf) -> Result<u32> {
        let audio = self.audio.to_path_buf();
        tokio::task::spawn_blocking(move || write_chunk(&audio, &span, &output))
            .await
            .map_err(|e| TranscribeError::Io(std::io::Error::other(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::plan_chunks;
    use crate::transcribe::Recognition;
    use async_trait::async_trait;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Echoes the chunk index, failing permanently for the listed indices.
    struct EchoRecognizer {
        fail: HashSet<usize>,
        seen: Mutex<Vec<usize>>,
        cancel_after_first: Option<CancelFlag>,
    }

    impl EchoRecognizer {
        fn new() -> Self {
            Self {
                fail: HashSet::new(),
                seen: Mutex::new(Vec::new()),
                cancel_after_first: None,
            }
        }
    }

    #[async_trait]
    impl SpeechRecognizer for EchoRecognizer {
        async fn recognize(
            &self,
            chunk: &AudioChunk,
            _language: Option<&str>,
        ) -> std::result::Result<Recognition, RecognitionError> {
            assert!(chunk.path.exists());
            self.seen.lock().unwrap().push(chunk.index);
            if let Some(cancel) = &self.cancel_after_first {
                cancel.cancel();
            }
            if self.fail.contains(&chunk.index) {
                return Err(RecognitionError::new(
                    RecognitionErrorKind::Rejected,
                    "scripted",
                ));
            }
            Ok(Recognition {
                text: format!("chunk {}", chunk.index),
                confidence: Some(0.8),
            })
        }

        fn name(&self) -> &'static str {
            "Echo"
        }
    }

    fn write_wav(path: &Path, seconds: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 800,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..(seconds * 800) {
            writer.write_sample((i % 500) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn setup(seconds: u32) -> (TempDir, TempResources, PathBuf) {
        let root = TempDir::new().unwrap();
        let resources = TempResources::create(root.path()).unwrap();
        let audio = resources.allocate("audio.wav");
        write_wav(&audio, seconds);
        (root, resources, audio)
    }

    #[tokio::test]
    async fn test_results_in_index_order() {
        let (_root, resources, audio) = setup(9);
        let cancel = CancelFlag::new();
        let recognizer = Arc::new(EchoRecognizer::new());
        let spans = plan_chunks(Duration::from_secs(9), Duration::from_secs(2));

        let mut progress = Vec::new();
        let outcome = ChunkRunner::new(recognizer.clone(), &resources, &audio, &cancel)
            .with_concurrency(3)
            .run(spans, |done, total| progress.push((done, total)))
            .await
            .unwrap();

        let RunnerOutcome::Finished(results) = outcome else {
            panic!("Expected all chunks to finish");
        };
        assert_eq!(results.len(), 5);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.index, i);
            assert_eq!(r.text, format!("chunk {i}"));
        }
        assert_eq!(results[4].duration, Duration::from_secs(1));
        assert_eq!(progress.last(), Some(&(5, 5)));
        // Only the extracted audio is still tracked
        assert_eq!(resources.tracked(), 1);
    }

    #[tokio::test]
    async fn test_failed_chunk_recorded() {
        let (_root, resources, audio) = setup(6);
        let cancel = CancelFlag::new();
        let mut recognizer = EchoRecognizer::new();
        recognizer.fail.insert(1);
        let spans = plan_chunks(Duration::from_secs(6), Duration::from_secs(2));

        let outcome = ChunkRunner::new(Arc::new(recognizer), &resources, &audio, &cancel)
            .run(spans, |_, _| {})
            .await
            .unwrap();

        let RunnerOutcome::Finished(results) = outcome else {
            panic!("Expected all chunks to finish");
        };
        assert!(results[0].is_success());
        assert_eq!(
            results[1].error.as_ref().map(|e| e.kind),
            Some(RecognitionErrorKind::Rejected)
        );
        assert_eq!(results[1].attempts, 1);
        assert!(results[2].is_success());
    }

    #[tokio::test]
    async fn test_chunk_beyond_audio_is_empty() {
        // Audio shorter than the planned span: the last chunk has no samples
        let (_root, resources, audio) = setup(2);
        let cancel = CancelFlag::new();
        let recognizer = Arc::new(EchoRecognizer::new());
        let spans = plan_chunks(Duration::from_secs(4), Duration::from_secs(2));

        let outcome = ChunkRunner::new(recognizer.clone(), &resources, &audio, &cancel)
            .run(spans, |_, _| {})
            .await
            .unwrap();

        let RunnerOutcome::Finished(results) = outcome else {
            panic!("Expected all chunks to finish");
        };
        assert_eq!(
            results[1].error.as_ref().map(|e| e.kind),
            Some(RecognitionErrorKind::EmptyChunk)
        );
        assert_eq!(results[1].attempts, 0);
        assert_eq!(*recognizer.seen.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_chunk() {
        let (_root, resources, audio) = setup(10);
        let cancel = CancelFlag::new();
        let mut recognizer = EchoRecognizer::new();
        recognizer.cancel_after_first = Some(cancel.clone());
        let recognizer = Arc::new(recognizer);
        let spans = plan_chunks(Duration::from_secs(10), Duration::from_secs(2));

        let outcome = ChunkRunner::new(recognizer.clone(), &resources, &audio, &cancel)
            .run(spans, |_, _| {})
            .await
            .unwrap();

        let RunnerOutcome::Cancelled(results) = outcome else {
            panic!("Expected cancellation");
        };
        assert_eq!(results.len(), 1);
        assert_eq!(*recognizer.seen.lock().unwrap(), vec![0]);
        assert_eq!(resources.tracked(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_audio_is_fatal() {
        let root = TempDir::new().unwrap();
        let resources = TempResources::create(root.path()).unwrap();
        let audio = resources.allocate("audio.wav");
        std::fs::write(&audio, b"not a wav").unwrap();
        let cancel = CancelFlag::new();
        let spans = plan_chunks(Duration::from_secs(2), Duration::from_secs(1));

        let result = ChunkRunner::new(Arc::new(EchoRecognizer::new()), &resources, &audio, &cancel)
            .run(spans, |_, _| {})
            .await;
        assert!(result.is_err());
        assert_eq!(resources.tracked(), 1);
    }
}
