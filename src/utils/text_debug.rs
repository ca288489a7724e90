// src/utils/text_debug.rs
use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::utils::error::{AppError, StorageError};

/// Saves extracted text to a file with `[[kind>>` ... `<<kind]]` markers around the highlighted spans
pub fn save_debug_text(text: &str, path: &Path, highlights: &[(usize, usize, &str)]) -> Result<(), AppError> {
    let mut file = File::create(path)?;

    let mut sorted_highlights = highlights.to_vec();
    sorted_highlights.sort_by_key(|h| (h.0, std::cmp::Reverse(h.1)));

    let mut annotated = String::with_capacity(text.len() + highlights.len() * 16);
    let mut last_pos = 0;
    for (start, end, kind) in sorted_highlights {
        // Overlapping matches are dropped, the earliest/longest one wins
        if start < last_pos {
            continue;
        }
        annotated.push_str(&text[last_pos..start]);
        annotated.push_str(&format!("[[{}>>", kind));
        annotated.push_str(&text[start..end]);
        annotated.push_str(&format!("<<{}]]", kind));
        last_pos = end;
    }
    annotated.push_str(&text[last_pos..]);

    file.write_all(annotated.as_bytes())?;

    tracing::info!("Saved debug text to {}", path.display());
    Ok(())
}

/// Creates an annotated copy of a document's text with every match of the given patterns marked
pub fn create_debug_text(text: &str, path: &Path, patterns: &[(&str, &str)]) -> Result<(), AppError> {
    use regex::Regex;

    let mut highlights = Vec::new();

    for (pattern, kind) in patterns {
        let re = Regex::new(pattern).map_err(|e| {
            AppError::Config(format!("Invalid regex pattern '{}': {}", pattern, e))
        })?;

        for mat in re.find_iter(text) {
            highlights.push((mat.start(), mat.end(), *kind));
        }
    }

    save_debug_text(text, path, &highlights)
}

/// Writes what the extractor made of a document as pretty JSON next to its text
pub fn save_debug_json<T: Serialize>(value: &T, path: &Path) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value).map_err(StorageError::from)?;
    std::fs::write(path, json)?;
    tracing::info!("Saved debug JSON to {}", path.display());
    Ok(())
}
