use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavWriter};
use tracing::debug;

use crate::error::{Result, TranscribeError};

use super::ChunkSpan;

/// Number of chunks needed to cover `total` with chunks of `chunk_duration`.
pub fn chunk_count(total: Duration, chunk_duration: Duration) -> usize {
    if chunk_duration.is_zero() {
        return 0;
    }
    total.as_nanos().div_ceil(chunk_duration.as_nanos()) as usize
}

/// Plan fixed-duration chunks covering the whole audio. Only the last chunk
/// may be shorter than `chunk_duration`.
pub fn plan_chunks(total: Duration, chunk_duration: Duration) -> Vec<ChunkSpan> {
    let count = chunk_count(total, chunk_duration);
    (0..count)
        .map(|index| {
            let offset = chunk_duration * index as u32;
            ChunkSpan {
                index,
                offset,
                duration: chunk_duration.min(total.saturating_sub(offset)),
            }
        })
        .collect()
}

/// Duration of a WAV file, read from its header.
pub fn wav_duration(path: &Path) -> Result<Duration> {
    let reader = WavReader::open(path).map_err(wav_error)?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        return Err(TranscribeError::Extraction(format!(
            "Invalid sample rate in {}",
            path.display()
        )));
    }
    Ok(Duration::from_secs_f64(reader.duration() as f64 / rate as f64))
}

/// Copy the frames covered by `span` from `source` into a new WAV at `output`.
///
/// Returns the number of frames written, which is zero when the span lies
/// beyond the end of the decoded audio.
pub fn write_chunk(source: &Path, span: &ChunkSpan, output: &Path) -> Result<u32> {
    let mut reader = WavReader::open(source).map_err(wav_error)?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int {
        return Err(TranscribeError::Extraction(
            "Only integer PCM audio can be chunked".to_string(),
        ));
    }

    let total_frames = reader.duration();
    let rate = spec.sample_rate as f64;
    let start = ((span.offset.as_secs_f64() * rate).round() as u32).min(total_frames);
    let end = ((span.end().as_secs_f64() * rate).round() as u32).min(total_frames);
    let frames = end.saturating_sub(start);

    reader.seek(start)?;
    let mut writer = WavWriter::create(output, spec).map_err(wav_error)?;
    let wanted = frames as usize * spec.channels as usize;
    for sample in reader.samples::<i32>().take(wanted) {
        writer.write_sample(sample.map_err(wav_error)?).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;

    debug!(
        "Wrote chunk {} ({} frames from {}) to {:?}",
        span.index, frames, start, output
    );
    Ok(frames)
}

fn wav_error(err: hound::Error) -> TranscribeError {
    match err {
        hound::Error::IoError(e) => TranscribeError::Io(e),
        other => TranscribeError::Extraction(format!("Invalid WAV data: {other}")),
    }
}
