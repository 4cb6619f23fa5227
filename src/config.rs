use crate::error::{Result, TranscribeError};
use crate::pipeline::progress::ThrottleConfig;
use crate::transcribe::retry::RetryPolicy;
use crate::transcript::JoinPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use 'text' or 'json'", s)),
        }
    }
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
        }
    }

    /// Replace the extension of `path` unless it already matches this format.
    pub fn ensure_extension(&self, path: &Path) -> PathBuf {
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(self.extension()));
        if matches {
            path.to_path_buf()
        } else {
            path.with_extension(self.extension())
        }
    }
}

/// Immutable pipeline settings attached to every request.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Duration of each recognition chunk (the last chunk may be shorter).
    pub chunk_duration: Duration,
    /// Retry policy for transient recognition failures.
    pub retry: RetryPolicy,
    /// Maximum number of chunks in flight at once.
    pub concurrency: usize,
    /// How chunk transcripts are joined in the output.
    pub join: JoinPolicy,
    /// Progress delivery throttling.
    pub throttle: ThrottleConfig,
    /// Root directory for per-job temp directories.
    pub temp_dir: PathBuf,
    /// Free temp space required, as a multiple of the source file size.
    pub disk_space_factor: f64,
    /// Resident memory (bytes) above which a warning is logged.
    pub memory_threshold: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            concurrency: 1,
            join: JoinPolicy::default(),
            throttle: ThrottleConfig::default(),
            temp_dir: std::env::temp_dir(),
            disk_space_factor: 2.0,
            memory_threshold: 1000 * 1024 * 1024,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_duration.is_zero() {
            return Err(TranscribeError::Validation(
                "Chunk duration must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(TranscribeError::Validation(
                "Retry attempts must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(TranscribeError::Validation(
                "Concurrency must be greater than 0".to_string(),
            ));
        }
        if !(self.disk_space_factor > 0.0) {
            return Err(TranscribeError::Validation(
                "Disk space factor must be positive".to_string(),
            ));
        }
        if !self.temp_dir.is_dir() {
            return Err(TranscribeError::Validation(format!(
                "Temp directory does not exist: {}",
                self.temp_dir.display()
            )));
        }
        Ok(())
    }
}

/// User settings, read from the config file and environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub default_format: OutputFormat,
    pub chunk_secs: u64,
    pub max_attempts: u32,
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub temp_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            default_format: OutputFormat::default(),
            chunk_secs: 30,
            max_attempts: 3,
            concurrency: 1,
            request_timeout_secs: 120,
            temp_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    TranscribeError::Config(format!(
                        "Failed to parse {}: {e}",
                        config_path.display()
                    ))
                })?;
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override settings from environment variables looked up through `var`.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Some(format) = var("VID2TEXT_DEFAULT_FORMAT") {
            if let Ok(f) = format.parse() {
                self.default_format = f;
            }
        }
        if let Some(secs) = var("VID2TEXT_CHUNK_SECS") {
            if let Ok(s) = secs.parse() {
                self.chunk_secs = s;
            }
        }
        if let Some(attempts) = var("VID2TEXT_MAX_ATTEMPTS") {
            if let Ok(a) = attempts.parse() {
                self.max_attempts = a;
            }
        }
        if let Some(concurrency) = var("VID2TEXT_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                self.concurrency = c;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.openai_api_key.is_none() {
            return Err(TranscribeError::Config(
                "OPENAI_API_KEY not set. Export it with: export OPENAI_API_KEY=sk-...".to_string(),
            ));
        }

        if self.chunk_secs == 0 {
            return Err(TranscribeError::Config(
                "Chunk duration must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(TranscribeError::Config(
                "Retry attempts must be at least 1".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(TranscribeError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the per-request pipeline settings from these defaults.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            chunk_duration: Duration::from_secs(self.chunk_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..defaults.retry
            },
            concurrency: self.concurrency,
            temp_dir: self.temp_dir.clone().unwrap_or(defaults.temp_dir.clone()),
            ..defaults
        }
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vid2text").join("config.toml"))
    }
}
