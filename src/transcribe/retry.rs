use crate::audio::AudioChunk;
use crate::pipeline::CancelFlag;
use crate::transcribe::{Recognition, RecognitionError, SpeechRecognizer};
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for transient recognition failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum RetryOutcome {
    Recognized { recognition: Recognition, attempts: u32 },
    Failed { error: RecognitionError, attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Recognize one chunk, retrying transient failures per `policy`.
///
/// Permanent failures return immediately. The cancel flag is checked before
/// every retry so a cancelled job does not sit through the backoff schedule.
pub async fn recognize_with_retry(
    recognizer: &dyn SpeechRecognizer,
    chunk: &AudioChunk,
    language: Option<&str>,
    policy: &RetryPolicy,
    cancel: &CancelFlag,
) -> RetryOutcome {
    let mut attempts = 0;

    loop {
        if attempts > 0 {
            let delay = policy.delay_for(attempts);
            debug!(
                "Retrying chunk {} in {}ms (attempt {})",
                chunk.index,
                delay.as_millis(),
                attempts + 1
            );
            tokio::time::sleep(delay).await;
            if cancel.is_cancelled() {
                return RetryOutcome::Cancelled { attempts };
            }
        }

        attempts += 1;
        match recognizer.recognize(chunk, language).await {
            Ok(recognition) => return RetryOutcome::Recognized { recognition, attempts },
            Err(error) if error.is_transient() && attempts < policy.max_attempts => {
                warn!("Chunk {} attempt {} failed: {}", chunk.index, attempts, error);
            }
            Err(error) => return RetryOutcome::Failed { error, attempts },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::RecognitionErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns scripted results in order, then succeeds.
    struct ScriptedRecognizer {
        script: Mutex<Vec<Result<Recognition, RecognitionError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedRecognizer {
        fn new(mut script: Vec<Result<Recognition, RecognitionError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SpeechRecognizer for ScriptedRecognizer {
        async fn recognize(
            &self,
            _chunk: &AudioChunk,
            _language: Option<&str>,
        ) -> Result<Recognition, RecognitionError> {
            *self.calls.lock().unwrap() += 1;
            self.script.lock().unwrap().pop().unwrap_or(Ok(Recognition {
                text: "fallback".to_string(),
                confidence: None,
            }))
        }

        fn name(&self) -> &'static str {
            "Scripted"
        }
    }

    fn chunk() -> AudioChunk {
        AudioChunk {
            index: 0,
            offset: Duration::ZERO,
            duration: Duration::from_secs(30),
            path: "/tmp/chunk_0000.wav".into(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn err(kind: RecognitionErrorKind) -> Result<Recognition, RecognitionError> {
        Err(RecognitionError::new(kind, "scripted"))
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let recognizer = ScriptedRecognizer::new(vec![
            err(RecognitionErrorKind::Network),
            err(RecognitionErrorKind::Timeout),
        ]);
        let outcome =
            recognize_with_retry(&recognizer, &chunk(), None, &fast_policy(), &CancelFlag::new())
                .await;

        match outcome {
            RetryOutcome::Recognized { recognition, attempts } => {
                assert_eq!(recognition.text, "fallback");
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected recognition, got {other:?}"),
        }
        assert_eq!(recognizer.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_exhausts_attempts() {
        let recognizer = ScriptedRecognizer::new(vec![
            err(RecognitionErrorKind::Server),
            err(RecognitionErrorKind::Server),
            err(RecognitionErrorKind::Server),
            err(RecognitionErrorKind::Server),
        ]);
        let outcome =
            recognize_with_retry(&recognizer, &chunk(), None, &fast_policy(), &CancelFlag::new())
                .await;

        match outcome {
            RetryOutcome::Failed { error, attempts } => {
                assert_eq!(error.kind, RecognitionErrorKind::Server);
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected failure, got {other:?}"),
        }
        assert_eq!(recognizer.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let recognizer = ScriptedRecognizer::new(vec![err(RecognitionErrorKind::UnsupportedAudio)]);
        let outcome =
            recognize_with_retry(&recognizer, &chunk(), None, &fast_policy(), &CancelFlag::new())
                .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Failed { attempts: 1, .. }
        ));
        assert_eq!(recognizer.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_retries() {
        let recognizer = ScriptedRecognizer::new(vec![err(RecognitionErrorKind::Network)]);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = recognize_with_retry(&recognizer, &chunk(), None, &fast_policy(), &cancel).await;
        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 1 }));
        assert_eq!(recognizer.calls(), 1);
    }
}
