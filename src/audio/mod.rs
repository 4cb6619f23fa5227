pub mod chunk;
pub mod extract;

pub use chunk::{chunk_count, plan_chunks, wav_duration, write_chunk};
pub use extract::{AudioExtractor, DecoderError, FfmpegExtractor};

use std::path::PathBuf;
use std::time::Duration;

/// A planned slice of the extracted audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub offset: Duration,
    pub duration: Duration,
}

impl ChunkSpan {
    pub fn end(&self) -> Duration {
        self.offset + self.duration
    }
}

/// A chunk of audio materialized on disk, ready for recognition.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub index: usize,
    pub offset: Duration,
    pub duration: Duration,
    pub path: PathBuf,
}

impl AudioChunk {
    pub fn new(span: ChunkSpan, path: PathBuf) -> Self {
        Self {
            index: span.index,
            offset: span.offset,
            duration: span.duration,
            path,
        }
    }

    pub fn end(&self) -> Duration {
        self.offset + self.duration
    }
}
