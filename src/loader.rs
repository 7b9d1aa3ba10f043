//! Document loading and text extraction.
//!
//! Supported formats: plain text (`.txt`), Markdown (`.md`), and PDF
//! (`.pdf`, extracted with `pdf-extract`). Anything else is unsupported
//! and callers are expected to skip it rather than fail.

use std::path::Path;

use crate::error::{RagError, Result};

/// Format of a supported document, used to pick a chunking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    PlainText,
    Markdown,
    Pdf,
}

/// Content type for the path's extension, or `None` when the file is not
/// a supported document.
pub fn supported_extension(path: &Path) -> Option<ContentType> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" => Some(ContentType::PlainText),
        "md" => Some(ContentType::Markdown),
        "pdf" => Some(ContentType::Pdf),
        _ => None,
    }
}

/// Read the file and extract its text.
///
/// Text files must be valid UTF-8. PDF extraction failures (encrypted or
/// malformed files) surface as [`RagError::DocumentProcessing`] with the
/// offending filename.
pub fn extract_text(path: &Path, content_type: ContentType) -> Result<String> {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bytes = std::fs::read(path).map_err(|e| RagError::DocumentProcessing {
        file: file.clone(),
        reason: format!("failed to read file: {e}"),
    })?;
    extract_from_bytes(&file, &bytes, content_type)
}

/// Extract text from already-read file contents.
pub fn extract_from_bytes(file: &str, bytes: &[u8], content_type: ContentType) -> Result<String> {
    match content_type {
        ContentType::PlainText | ContentType::Markdown => String::from_utf8(bytes.to_vec())
            .map_err(|e| RagError::DocumentProcessing {
                file: file.to_string(),
                reason: format!("file is not valid utf-8: {e}"),
            }),
        ContentType::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| RagError::DocumentProcessing {
                file: file.to_string(),
                reason: format!("pdf extraction failed: {e}"),
            })
        }
    }
}
