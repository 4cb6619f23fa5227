// JSON transcript format
use super::{TranscriptFormatter, TranscriptionResult, Warning, FORMAT_VERSION};
use crate::error::{Result, TranscribeError};
use crate::transcribe::RecognitionErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub struct JsonFormatter;

/// On-disk shape of a JSON transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptDocument {
    pub format_version: String,
    /// RFC 3339 creation time.
    pub created_at: DateTime<Utc>,
    pub transcript: String,
    pub word_count: usize,
    pub character_count: usize,
    pub audio_duration_secs: f64,
    pub processing_time_secs: f64,
    pub chunk_count: usize,
    pub failed_chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub chunks: Vec<ChunkEntry>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub index: usize,
    pub offset_secs: f64,
    pub duration_secs: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ChunkErrorEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkErrorEntry {
    pub kind: RecognitionErrorKind,
    pub message: String,
}

impl From<&TranscriptionResult> for TranscriptDocument {
    fn from(result: &TranscriptionResult) -> Self {
        let meta = &result.metadata;
        Self {
            format_version: FORMAT_VERSION.to_string(),
            created_at: meta.created_at,
            transcript: result.text.clone(),
            word_count: meta.word_count,
            character_count: meta.character_count,
            audio_duration_secs: meta.audio_duration.as_secs_f64(),
            processing_time_secs: meta.processing_time.as_secs_f64(),
            chunk_count: meta.chunk_count,
            failed_chunks: meta.failed_chunks,
            language: meta.language.clone(),
            chunks: result
                .chunks
                .iter()
                .map(|c| ChunkEntry {
                    index: c.index,
                    offset_secs: c.offset.as_secs_f64(),
                    duration_secs: c.duration.as_secs_f64(),
                    text: c.text.clone(),
                    confidence: c.confidence,
                    error: c.error.as_ref().map(|e| ChunkErrorEntry {
                        kind: e.kind,
                        message: e.message.clone(),
                    }),
                })
                .collect(),
            warnings: result.warnings.clone(),
        }
    }
}

impl TranscriptFormatter for JsonFormatter {
    fn format(&self, result: &TranscriptionResult) -> String {
        serde_json::to_string_pretty(&TranscriptDocument::from(result))
            .unwrap_or_else(|_| "{}".to_string())
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

/// Read a JSON transcript written by this crate.
pub fn load_json(path: &Path) -> Result<TranscriptDocument> {
    let contents = std::fs::read_to_string(path)?;
    let document: TranscriptDocument = serde_json::from_str(&contents)?;

    let major = document.format_version.split('.').next().unwrap_or_default();
    let expected = FORMAT_VERSION.split('.').next().unwrap_or_default();
    if major != expected {
        return Err(TranscribeError::Validation(format!(
            "Unsupported transcript format version {} (expected {})",
            document.format_version, FORMAT_VERSION
        )));
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::tests::sample_result;
    use tempfile::TempDir;

    #[test]
    fn test_document_fields() {
        let result = sample_result();
        let output = JsonFormatter.format(&result);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["format_version"], "1.0");
        let created_at = value["created_at"].as_str().unwrap();
        let parsed = DateTime::parse_from_rfc3339(created_at).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), result.metadata.created_at);
        assert_eq!(value["transcript"], "hello world how are you");
        assert_eq!(value["word_count"], 5);
        assert_eq!(value["chunk_count"], 3);
        assert_eq!(value["failed_chunks"], 1);
        assert_eq!(value["language"], "en");
        assert_eq!(value["audio_duration_secs"], 90.0);
        assert_eq!(value["chunks"][1]["error"]["kind"], "timeout");
        assert!(value["chunks"][0].get("error").is_none());
        assert_eq!(value["warnings"][0]["chunk_index"], 1);
    }

    #[test]
    fn test_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talk.json");
        let result = sample_result();
        std::fs::write(&path, JsonFormatter.format(&result)).unwrap();

        let document = load_json(&path).unwrap();
        assert_eq!(document, TranscriptDocument::from(&result));
        assert_eq!(document.transcript, "hello world how are you");
        assert_eq!(document.chunks.len(), 3);
        assert_eq!(document.warnings[0].kind, RecognitionErrorKind::Timeout);
    }

    #[test]
    fn test_load_json_rejects_other_major_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("talk.json");
        let mut document = TranscriptDocument::from(&sample_result());
        document.format_version = "2.0".to_string();
        std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

        assert!(load_json(&path).is_err());
    }
}
