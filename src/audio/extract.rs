use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::chunk::wav_duration;

/// Sample rate of the extracted audio; 16 kHz mono is what speech services expect.
pub const EXTRACT_SAMPLE_RATE: u32 = 16000;

/// Errors reported by the video decoding collaborator.
#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("{0} not found. Install FFmpeg and ensure it is in your PATH")]
    ToolMissing(String),

    #[error("No audio stream in {0}")]
    NoAudioStream(String),

    #[error("Decoder failed: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pulls the audio track out of a video container.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Decode the audio of `video` into a 16-bit PCM WAV written to `output`
    /// and return the duration of the decoded audio.
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<Duration, DecoderError>;

    fn name(&self) -> &'static str;
}

/// Extractor backed by the `ffmpeg` and `ffprobe` command line tools.
pub struct FfmpegExtractor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    sample_rate: u32,
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegExtractor {
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            sample_rate: EXTRACT_SAMPLE_RATE,
        }
    }

    /// Use specific `ffmpeg`/`ffprobe` binaries instead of looking them up in PATH.
    pub fn with_binaries(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    /// Check that both tools can be executed.
    pub async fn check_tools(&self) -> Result<(), DecoderError> {
        for tool in [&self.ffmpeg, &self.ffprobe] {
            let output = Command::new(tool)
                .arg("-version")
                .output()
                .await
                .map_err(|_| DecoderError::ToolMissing(tool.display().to_string()))?;
            if !output.status.success() {
                return Err(DecoderError::ToolMissing(tool.display().to_string()));
            }
        }
        debug!("FFmpeg and FFprobe are available");
        Ok(())
    }

    /// Whether the container has at least one audio stream.
    pub async fn has_audio_stream(&self, input: &Path) -> Result<bool, DecoderError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "a",
                "-show_entries",
                "stream=index",
                "-of",
                "csv=p=0",
            ])
            .arg(input)
            .output()
            .await
            .map_err(|_| DecoderError::ToolMissing(self.ffprobe.display().to_string()))?;

        if !output.status.success() {
            return Err(DecoderError::Decode(format!(
                "FFprobe could not read {}: {}",
                input.display(),
                stderr_tail(&output.stderr)
            )));
        }

        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<Duration, DecoderError> {
        self.check_tools().await?;

        if !self.has_audio_stream(video).await? {
            return Err(DecoderError::NoAudioStream(video.display().to_string()));
        }

        info!("Extracting audio from {}", video.display());

        let result = Command::new(&self.ffmpeg)
            .args(["-y", "-nostdin", "-i"])
            .arg(video)
            .args(["-vn", "-acodec", "pcm_s16le", "-ar"])
            .arg(self.sample_rate.to_string())
            .args(["-ac", "1"])
            .arg(output)
            .output()
            .await
            .map_err(|_| DecoderError::ToolMissing(self.ffmpeg.display().to_string()))?;

        if !result.status.success() {
            return Err(DecoderError::Decode(format!(
                "FFmpeg audio extraction failed: {}",
                stderr_tail(&result.stderr)
            )));
        }

        if !output.exists() {
            return Err(DecoderError::Decode(
                "Output file was not created".to_string(),
            ));
        }

        let duration = wav_duration(output).map_err(|e| DecoderError::Decode(e.to_string()))?;
        info!(
            "Audio extracted to {} ({:.1}s)",
            output.display(),
            duration.as_secs_f64()
        );
        Ok(duration)
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// Last few lines of a tool's stderr, enough to explain a failure.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(3)..].join(" | ")
}
