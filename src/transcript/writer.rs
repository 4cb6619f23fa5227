use super::{create_formatter, JoinPolicy, TranscriptionResult};
use crate::config::OutputFormat;
use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Write `content` to `path` through a sibling temp file and a rename, so
/// `path` holds either its old content or the complete new one.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".vid2text_")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    debug!("Wrote {} bytes to {:?}", content.len(), tmp.path());

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Render `result` in `format` and write it atomically to `path`.
pub fn write_result(
    result: &TranscriptionResult,
    format: OutputFormat,
    join: &JoinPolicy,
    path: &Path,
) -> Result<()> {
    let formatter = create_formatter(format, join);
    let content = formatter.format(result);
    write_atomic(path, &content)?;
    info!(
        "Wrote {} transcript ({} words) to {:?}",
        formatter.extension(),
        result.metadata.word_count,
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::load_json;
    use crate::transcript::tests::sample_result;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, "new content").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new content");
        // No temp siblings left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_atomic_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone").join("out.txt");
        assert!(write_atomic(&path, "x").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_text_and_json_agree() {
        let dir = TempDir::new().unwrap();
        let result = sample_result();
        let join = JoinPolicy::default();
        let text_path = dir.path().join("out.txt");
        let json_path = dir.path().join("out.json");

        write_result(&result, OutputFormat::Text, &join, &text_path).unwrap();
        write_result(&result, OutputFormat::Json, &join, &json_path).unwrap();

        let text = std::fs::read_to_string(&text_path).unwrap();
        let document = load_json(&json_path).unwrap();
        assert_eq!(text, document.transcript);
        assert_eq!(document.chunk_count, result.chunks.len());
    }
}
