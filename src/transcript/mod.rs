pub mod json;
pub mod text;
pub mod writer;

pub use json::{load_json, ChunkEntry, TranscriptDocument};
pub use writer::{write_atomic, write_result};

use crate::config::OutputFormat;
use crate::transcribe::{ChunkResult, RecognitionErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version tag of the JSON output.
pub const FORMAT_VERSION: &str = "1.0";

/// How chunk texts are joined into the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPolicy {
    pub separator: String,
    /// Put each chunk on its own line behind an `[HH:MM:SS]` marker in text output.
    pub timestamps: bool,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            separator: " ".to_string(),
            timestamps: false,
        }
    }
}

/// A chunk that ended without text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub chunk_index: usize,
    pub kind: RecognitionErrorKind,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMetadata {
    pub word_count: usize,
    pub character_count: usize,
    pub audio_duration: Duration,
    pub processing_time: Duration,
    pub chunk_count: usize,
    pub failed_chunks: usize,
    pub language: Option<String>,
    /// When the transcript was assembled.
    pub created_at: DateTime<Utc>,
}

/// The finished product of a job.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub chunks: Vec<ChunkResult>,
    pub metadata: TranscriptMetadata,
    pub warnings: Vec<Warning>,
}

impl TranscriptionResult {
    /// Join chunk results (already in index order) and compute metadata.
    pub fn aggregate(
        chunks: Vec<ChunkResult>,
        join: &JoinPolicy,
        audio_duration: Duration,
        processing_time: Duration,
        language: Option<String>,
    ) -> Self {
        let text = join_chunks(&chunks, &join.separator);
        let warnings: Vec<Warning> = chunks
            .iter()
            .filter_map(|c| {
                c.error.as_ref().map(|e| Warning {
                    chunk_index: c.index,
                    kind: e.kind,
                    message: e.message.clone(),
                    attempts: c.attempts,
                })
            })
            .collect();

        let metadata = TranscriptMetadata {
            word_count: text.split_whitespace().count(),
            character_count: text.chars().count(),
            audio_duration,
            processing_time,
            chunk_count: chunks.len(),
            failed_chunks: warnings.len(),
            language,
            created_at: Utc::now(),
        };

        Self {
            text,
            chunks,
            metadata,
            warnings,
        }
    }

    pub fn successful_chunks(&self) -> usize {
        self.metadata.chunk_count - self.metadata.failed_chunks
    }

    pub fn has_errors(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Non-empty chunk texts in order, joined with `separator`.
pub fn join_chunks(chunks: &[ChunkResult], separator: &str) -> String {
    chunks
        .iter()
        .map(|c| c.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Renders a result as file content.
pub trait TranscriptFormatter {
    fn format(&self, result: &TranscriptionResult) -> String;
    fn extension(&self) -> &'static str;
}

pub fn create_formatter(format: OutputFormat, join: &JoinPolicy) -> Box<dyn TranscriptFormatter> {
    match format {
        OutputFormat::Text => Box::new(text::TextFormatter {
            timestamps: join.timestamps,
        }),
        OutputFormat::Json => Box::new(json::JsonFormatter),
    }
}

/// `HH:MM:SS` for a chunk offset.
pub fn format_timestamp(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
