use serde::Serialize;
use thiserror::Error;

use crate::audio::extract::DecoderError;
use crate::transcribe::RecognitionError;

#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("A transcription job is already running")]
    Busy,

    #[error("Insufficient disk space: {required} bytes required, {available} bytes available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Audio extraction failed: {0}")]
    Extraction(String),

    #[error("No audio track found in {0}")]
    NoAudioTrack(String),

    #[error("Speech recognition failed: {0}")]
    Recognition(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transcription was cancelled")]
    Cancelled,

    #[error("Transcription worker panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TranscribeError>;

/// Category of a [`TranscribeError`], handed to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Busy,
    InsufficientSpace,
    Extraction,
    NoAudioTrack,
    Recognition,
    Config,
    Cancelled,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Busy => "busy",
            ErrorKind::InsufficientSpace => "insufficient_space",
            ErrorKind::Extraction => "extraction",
            ErrorKind::NoAudioTrack => "no_audio_track",
            ErrorKind::Recognition => "recognition",
            ErrorKind::Config => "config",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

impl TranscribeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscribeError::Validation(_) => ErrorKind::Validation,
            TranscribeError::Busy => ErrorKind::Busy,
            TranscribeError::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            TranscribeError::Extraction(_) => ErrorKind::Extraction,
            TranscribeError::NoAudioTrack(_) => ErrorKind::NoAudioTrack,
            TranscribeError::Recognition(_) => ErrorKind::Recognition,
            TranscribeError::Config(_) => ErrorKind::Config,
            TranscribeError::Cancelled => ErrorKind::Cancelled,
            TranscribeError::Panicked(_) | TranscribeError::Io(_) | TranscribeError::Json(_) => {
                ErrorKind::Io
            }
        }
    }
}

impl From<DecoderError> for TranscribeError {
    fn from(err: DecoderError) -> Self {
        match err {
            DecoderError::NoAudioStream(path) => TranscribeError::NoAudioTrack(path),
            other => TranscribeError::Extraction(other.to_string()),
        }
    }
}

impl From<RecognitionError> for TranscribeError {
    fn from(err: RecognitionError) -> Self {
        TranscribeError::Recognition(err.to_string())
    }
}
