pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod resources;
pub mod transcribe;
pub mod transcript;

pub use config::{Config, OutputFormat, PipelineConfig};
pub use error::{ErrorKind, Result, TranscribeError};
pub use pipeline::{JobEvent, JobHandle, JobOutcome, JobStatus, Orchestrator};
pub use request::{Diagnostics, TranscriptionRequest};
pub use transcript::TranscriptionResult;
