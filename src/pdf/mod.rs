// src/pdf/mod.rs
use crate::utils::error::ExtractError;

/// Extracts the plain text of every page, pages separated by newlines.
///
/// `pdf-extract` panics on some malformed inputs; the panic is caught and reported
/// as an unreadable PDF so one bad file does not end the run.
pub fn extract_text(pdf_bytes: &[u8]) -> Result<String, ExtractError> {
    if !pdf_bytes.starts_with(b"%PDF") {
        return Err(ExtractError::UnreadablePdf("missing %PDF header".to_string()));
    }

    let outcome = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(pdf_bytes));
    match outcome {
        Ok(Ok(text)) => {
            tracing::debug!("Extracted {} characters of text", text.len());
            Ok(text)
        }
        Ok(Err(e)) => Err(ExtractError::UnreadablePdf(e.to_string())),
        Err(_) => Err(ExtractError::UnreadablePdf("PDF parser panicked".to_string())),
    }
}
