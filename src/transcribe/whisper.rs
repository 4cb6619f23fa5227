use crate::audio::AudioChunk;
use crate::transcribe::{Recognition, RecognitionError, RecognitionErrorKind, SpeechRecognizer};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// OpenAI Whisper API endpoint.
const WHISPER_API_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Maximum file size for Whisper API (25 MB).
const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Whisper model variants.
#[derive(Debug, Clone, Copy, Default)]
pub enum WhisperModel {
    #[default]
    Whisper1,
    Gpt4oTranscribe,
    Gpt4oMiniTranscribe,
}

impl WhisperModel {
    fn as_str(&self) -> &'static str {
        match self {
            WhisperModel::Whisper1 => "whisper-1",
            WhisperModel::Gpt4oTranscribe => "gpt-4o-transcribe",
            WhisperModel::Gpt4oMiniTranscribe => "gpt-4o-mini-transcribe",
        }
    }
}

/// OpenAI Whisper API client.
///
/// Makes exactly one request per call; retrying is left to the caller, which
/// gets a categorized [`RecognitionError`] to decide with.
pub struct WhisperClient {
    client: reqwest::Client,
    api_key: String,
    model: WhisperModel,
    endpoint: String,
    timeout: Duration,
    prompt: Option<String>,
}

impl WhisperClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: WhisperModel::default(),
            endpoint: WHISPER_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            prompt: None,
        }
    }

    pub fn with_model(mut self, model: WhisperModel) -> Self {
        self.model = model;
        self
    }

    /// Send requests to a different URL, e.g. a compatible self-hosted server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a prompt for vocabulary hints (max 224 tokens).
    pub fn with_prompt(mut self, prompt: String) -> Self {
        self.prompt = Some(prompt);
        self
    }

    async fn build_form(
        &self,
        chunk: &AudioChunk,
        language: Option<&str>,
    ) -> Result<Form, RecognitionError> {
        let file_bytes = fs::read(&chunk.path).await.map_err(|e| {
            RecognitionError::new(
                RecognitionErrorKind::UnsupportedAudio,
                format!("Cannot read {}: {e}", chunk.path.display()),
            )
        })?;
        let file_name = chunk
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let file_part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| RecognitionError::new(RecognitionErrorKind::UnsupportedAudio, e.to_string()))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.as_str())
            .text("response_format", "verbose_json");

        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        if let Some(ref prompt) = self.prompt {
            form = form.text("prompt", prompt.clone());
        }

        Ok(form)
    }

    async fn call_api(&self, form: Form) -> Result<WhisperResponse, RecognitionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!("Whisper API response status: {}", status);

        let body = response.text().await.map_err(transport_error)?;
        if status.is_success() {
            debug!("Whisper API response: {}", truncate(&body, 500));
            return serde_json::from_str(&body).map_err(|e| {
                RecognitionError::new(
                    RecognitionErrorKind::InvalidResponse,
                    format!("Unexpected response body: {e}"),
                )
            });
        }

        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(api_error) => format!(
                "Whisper API error ({}): {} ({})",
                status, api_error.error.message, api_error.error.r#type
            ),
            Err(_) => format!("Whisper API error ({}): {}", status, truncate(&body, 200)),
        };
        Err(RecognitionError::new(classify_status(status, &body), message))
    }
}

/// Map a failed HTTP status onto a recognition error kind.
fn classify_status(status: StatusCode, body: &str) -> RecognitionErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RecognitionErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT => RecognitionErrorKind::Timeout,
        StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNSUPPORTED_MEDIA_TYPE => {
            RecognitionErrorKind::UnsupportedAudio
        }
        StatusCode::BAD_REQUEST => {
            let body = body.to_lowercase();
            if body.contains("audio") || body.contains("file") {
                RecognitionErrorKind::UnsupportedAudio
            } else {
                RecognitionErrorKind::Rejected
            }
        }
        s if s.is_server_error() => RecognitionErrorKind::Server,
        _ => RecognitionErrorKind::Rejected,
    }
}

fn transport_error(err: reqwest::Error) -> RecognitionError {
    let kind = if err.is_timeout() {
        RecognitionErrorKind::Timeout
    } else if err.is_decode() {
        RecognitionErrorKind::InvalidResponse
    } else {
        RecognitionErrorKind::Network
    };
    RecognitionError::new(kind, err.to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Mean segment probability, taken from each segment's average log-probability.
fn segment_confidence(segments: &[WhisperSegment]) -> Option<f32> {
    let logprobs: Vec<f64> = segments.iter().filter_map(|s| s.avg_logprob).collect();
    if logprobs.is_empty() {
        return None;
    }
    let mean = logprobs.iter().map(|lp| lp.exp()).sum::<f64>() / logprobs.len() as f64;
    Some(mean.clamp(0.0, 1.0) as f32)
}

#[async_trait]
impl SpeechRecognizer for WhisperClient {
    async fn recognize(
        &self,
        chunk: &AudioChunk,
        language: Option<&str>,
    ) -> Result<Recognition, RecognitionError> {
        debug!(
            "Transcribing chunk {} with Whisper: {:?}",
            chunk.index, chunk.path
        );

        let metadata = fs::metadata(&chunk.path).await.map_err(|e| {
            RecognitionError::new(
                RecognitionErrorKind::UnsupportedAudio,
                format!("Cannot read {}: {e}", chunk.path.display()),
            )
        })?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(RecognitionError::new(
                RecognitionErrorKind::UnsupportedAudio,
                format!(
                    "File too large for Whisper API: {} bytes (max {} bytes)",
                    metadata.len(),
                    MAX_FILE_SIZE
                ),
            ));
        }

        let form = self.build_form(chunk, language).await?;
        let response = self.call_api(form).await?;

        let confidence = response
            .segments
            .as_deref()
            .and_then(segment_confidence);
        debug!(
            "Whisper returned {} characters for chunk {}",
            response.text.len(),
            chunk.index
        );

        Ok(Recognition {
            text: response.text.trim().to_string(),
            confidence,
        })
    }

    fn name(&self) -> &'static str {
        "OpenAI Whisper"
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Option<Vec<WhisperSegment>>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    avg_logprob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    r#type: String,
}
