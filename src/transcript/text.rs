// Plain text transcript format
use super::{format_timestamp, TranscriptFormatter, TranscriptionResult};

pub struct TextFormatter {
    pub timestamps: bool,
}

impl TranscriptFormatter for TextFormatter {
    fn format(&self, result: &TranscriptionResult) -> String {
        if self.timestamps {
            result
                .chunks
                .iter()
                .filter(|c| !c.text.trim().is_empty())
                .map(|c| format!("[{}] {}", format_timestamp(c.offset), c.text.trim()))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            result.text.clone()
        }
    }

    fn extension(&self) -> &'static str {
        "txt"
    }
}
