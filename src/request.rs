//! Transcription requests and their up-front validation.

use crate::config::{OutputFormat, PipelineConfig};
use crate::error::{Result, TranscribeError};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Video containers accepted as transcription sources.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v", "3gp", "ogv", "ts", "mts", "m2ts",
];

/// Largest source file accepted (10 GiB).
pub const MAX_SOURCE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// How much detail goes into human-readable error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Diagnostics {
    #[default]
    Normal,
    Verbose,
}

impl Diagnostics {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Diagnostics::Verbose
        } else {
            Diagnostics::Normal
        }
    }
}

/// Everything needed to run one transcription job.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub language: Option<String>,
    pub diagnostics: Diagnostics,
    pub config: PipelineConfig,
}

impl TranscriptionRequest {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            format,
            language: None,
            diagnostics: Diagnostics::default(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Check the request before any work is scheduled.
    pub fn validate(&self) -> Result<()> {
        validate_source(&self.source)?;
        validate_output(&self.output, &self.source)?;

        if let Some(language) = &self.language {
            if language.trim().is_empty() {
                return Err(TranscribeError::Validation(
                    "Language hint must not be empty".to_string(),
                ));
            }
        }

        self.config.validate()?;
        debug!("Request for {} passed validation", self.source.display());
        Ok(())
    }
}

/// Whether `path` carries one of the supported video extensions.
pub fn is_supported_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
}

fn validate_source(source: &Path) -> Result<()> {
    if !source.exists() {
        return Err(TranscribeError::Validation(format!(
            "File does not exist: {}",
            source.display()
        )));
    }
    if !source.is_file() {
        return Err(TranscribeError::Validation(format!(
            "Path is not a file: {}",
            source.display()
        )));
    }
    if !is_supported_video(source) {
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(TranscribeError::Validation(format!(
            "Unsupported file format '{}'. Supported: {}",
            ext,
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    let file = File::open(source).map_err(|e| {
        TranscribeError::Validation(format!("File is not readable: {}: {e}", source.display()))
    })?;
    let size = file.metadata()?.len();
    if size == 0 {
        return Err(TranscribeError::Validation(format!(
            "File is empty: {}",
            source.display()
        )));
    }
    if size > MAX_SOURCE_SIZE {
        return Err(TranscribeError::Validation(format!(
            "File is too large ({:.1} GB, max 10 GB)",
            size as f64 / (1024.0 * 1024.0 * 1024.0)
        )));
    }
    Ok(())
}

fn validate_output(output: &Path, source: &Path) -> Result<()> {
    if output.file_name().is_none() {
        return Err(TranscribeError::Validation(format!(
            "Invalid output file name: {}",
            output.display()
        )));
    }
    if output.is_dir() {
        return Err(TranscribeError::Validation(format!(
            "Output path is a directory: {}",
            output.display()
        )));
    }
    if output == source {
        return Err(TranscribeError::Validation(
            "Output path must differ from the source video".to_string(),
        ));
    }

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(TranscribeError::Validation(format!(
            "Output directory does not exist: {}",
            parent.display()
        )));
    }

    // Probe writability with a throwaway file; it is removed when dropped.
    tempfile::tempfile_in(parent).map_err(|e| {
        TranscribeError::Validation(format!(
            "Output directory is not writable: {}: {e}",
            parent.display()
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn write_video(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"not really a video but not empty").unwrap();
        path
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_video(Path::new("movie.mp4")));
        assert!(is_supported_video(Path::new("MOVIE.MKV")));
        assert!(is_supported_video(Path::new("clip.m2ts")));
        assert!(!is_supported_video(Path::new("song.mp3")));
        assert!(!is_supported_video(Path::new("noext")));
    }

    #[test]
    fn test_valid_request() {
        let dir = TempDir::new().unwrap();
        let source = write_video(&dir, "talk.mp4");
        let request = TranscriptionRequest::new(&source, dir.path().join("talk.txt"), OutputFormat::Text)
            .with_language("en");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let request = TranscriptionRequest::new(
            dir.path().join("missing.mp4"),
            dir.path().join("out.txt"),
            OutputFormat::Text,
        );
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let source = write_video(&dir, "notes.docx");
        let request = TranscriptionRequest::new(&source, dir.path().join("out.txt"), OutputFormat::Text);
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("Unsupported file format"));
    }

    #[test]
    fn test_empty_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("empty.mp4");
        std::fs::write(&source, b"").unwrap();
        let request = TranscriptionRequest::new(&source, dir.path().join("out.txt"), OutputFormat::Text);
        assert!(request.validate().unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_source_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("folder.mp4");
        std::fs::create_dir(&source).unwrap();
        let request = TranscriptionRequest::new(&source, dir.path().join("out.txt"), OutputFormat::Text);
        assert!(request.validate().unwrap_err().to_string().contains("not a file"));
    }

    #[test]
    fn test_missing_output_directory() {
        let dir = TempDir::new().unwrap();
        let source = write_video(&dir, "talk.mp4");
        let request = TranscriptionRequest::new(
            &source,
            dir.path().join("nope").join("out.txt"),
            OutputFormat::Text,
        );
        assert!(request
            .validate()
            .unwrap_err()
            .to_string()
            .contains("Output directory does not exist"));
    }

    #[test]
    fn test_output_is_directory() {
        let dir = TempDir::new().unwrap();
        let source = write_video(&dir, "talk.mp4");
        let request = TranscriptionRequest::new(&source, dir.path(), OutputFormat::Text);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_output_same_as_source() {
        let dir = TempDir::new().unwrap();
        let source = write_video(&dir, "talk.mp4");
        let request = TranscriptionRequest::new(&source, &source, OutputFormat::Text);
        assert!(request.validate().unwrap_err().to_string().contains("differ"));
    }

    #[test]
    fn test_blank_language_hint() {
        let dir = TempDir::new().unwrap();
        let source = write_video(&dir, "talk.mp4");
        let request = TranscriptionRequest::new(&source, dir.path().join("out.txt"), OutputFormat::Text)
            .with_language("  ");
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_diagnostics_from_verbose() {
        assert_eq!(Diagnostics::from_verbose(true), Diagnostics::Verbose);
        assert_eq!(Diagnostics::from_verbose(false), Diagnostics::Normal);
    }
}
