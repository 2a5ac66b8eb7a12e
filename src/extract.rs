//! PDF text extraction for the ingestion pipeline.
//!
//! Extraction never panics: failures come back as [`ExtractError`] and the
//! pipeline records them as a document error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("PDF contains no extractable text")]
    Empty,
}

/// Extracts plain text from PDF bytes, page by page.
///
/// Returns the concatenated text with page markers and the page count.
/// Pages with no extractable text are skipped in the output but still
/// counted.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<(String, u32), ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let page_count = pages.len() as u32;
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        out.push_str(&format!("\n--- Page {} ---\n", i + 1));
        out.push_str(page);
    }

    if out.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    Ok((out, page_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_fail_cleanly() {
        let err = extract_pdf_text(b"definitely not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}
