pub mod retry;
pub mod runner;
pub mod whisper;

pub use retry::{recognize_with_retry, RetryOutcome, RetryPolicy};
pub use runner::{ChunkRunner, RunnerOutcome};
pub use whisper::WhisperClient;

use crate::audio::AudioChunk;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Text recognized from one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionErrorKind {
    Network,
    Timeout,
    RateLimited,
    Server,
    UnsupportedAudio,
    EmptyChunk,
    Rejected,
    InvalidResponse,
}

impl RecognitionErrorKind {
    /// Transient failures are worth another attempt; the rest never succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecognitionErrorKind::Network
                | RecognitionErrorKind::Timeout
                | RecognitionErrorKind::RateLimited
                | RecognitionErrorKind::Server
        )
    }
}

impl std::fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecognitionErrorKind::Network => "network",
            RecognitionErrorKind::Timeout => "timeout",
            RecognitionErrorKind::RateLimited => "rate_limited",
            RecognitionErrorKind::Server => "server",
            RecognitionErrorKind::UnsupportedAudio => "unsupported_audio",
            RecognitionErrorKind::EmptyChunk => "empty_chunk",
            RecognitionErrorKind::Rejected => "rejected",
            RecognitionErrorKind::InvalidResponse => "invalid_response",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct RecognitionError {
    pub kind: RecognitionErrorKind,
    pub message: String,
}

impl RecognitionError {
    pub fn new(kind: RecognitionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Outcome of one chunk after all attempts. Failed chunks keep an empty text.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub index: usize,
    pub offset: Duration,
    pub duration: Duration,
    pub text: String,
    pub confidence: Option<f32>,
    pub error: Option<RecognitionError>,
    pub attempts: u32,
}

impl ChunkResult {
    pub fn success(chunk: &AudioChunk, recognition: Recognition, attempts: u32) -> Self {
        Self {
            index: chunk.index,
            offset: chunk.offset,
            duration: chunk.duration,
            text: recognition.text.trim().to_string(),
            confidence: recognition.confidence,
            error: None,
            attempts,
        }
    }

    pub fn failure(chunk: &AudioChunk, error: RecognitionError, attempts: u32) -> Self {
        Self {
            index: chunk.index,
            offset: chunk.offset,
            duration: chunk.duration,
            text: String::new(),
            confidence: None,
            error: Some(error),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The external speech-to-text service.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(
        &self,
        chunk: &AudioChunk,
        language: Option<&str>,
    ) -> Result<Recognition, RecognitionError>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(RecognitionErrorKind::Network.is_transient());
        assert!(RecognitionErrorKind::Timeout.is_transient());
        assert!(RecognitionErrorKind::RateLimited.is_transient());
        assert!(RecognitionErrorKind::Server.is_transient());
        assert!(!RecognitionErrorKind::UnsupportedAudio.is_transient());
        assert!(!RecognitionErrorKind::EmptyChunk.is_transient());
        assert!(!RecognitionErrorKind::Rejected.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = RecognitionError::new(RecognitionErrorKind::Timeout, "no answer in 120s");
        assert_eq!(err.to_string(), "timeout: no answer in 120s");
    }

    #[test]
    fn test_chunk_result_trims_text() {
        let chunk = AudioChunk {
            index: 2,
            offset: Duration::from_secs(60),
            duration: Duration::from_secs(30),
            path: "/tmp/chunk_0002.wav".into(),
        };
        let result = ChunkResult::success(
            &chunk,
            Recognition {
                text: "  hello there \n".to_string(),
                confidence: Some(0.9),
            },
            1,
        );
        assert_eq!(result.text, "hello there");
        assert!(result.is_success());
        assert_eq!(result.index, 2);

        let failed = ChunkResult::failure(
            &chunk,
            RecognitionError::new(RecognitionErrorKind::EmptyChunk, "no samples"),
            0,
        );
        assert!(!failed.is_success());
        assert!(failed.text.is_empty());
    }
}
