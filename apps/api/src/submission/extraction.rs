use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::models::submission::DocumentKind;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported document kind: {0}")]
    Unsupported(&'static str),

    #[error("Document could not be read: {0}")]
    Corrupt(String),

    #[error("Document contains no text")]
    Empty,

    #[error("Source could not be loaded: {0}")]
    Source(String),
}

/// Turns stored document bytes into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, bytes: Bytes, kind: DocumentKind) -> Result<String, ExtractionError>;
}

/// PDF extraction via `pdf-extract` (on a blocking thread) and UTF-8 decoding for text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentTextExtractor;

#[async_trait]
impl TextExtractor for DocumentTextExtractor {
    async fn extract_text(&self, bytes: Bytes, kind: DocumentKind) -> Result<String, ExtractionError> {
        let text = match kind {
            DocumentKind::Pdf => {
                tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                    .await
                    .map_err(|e| ExtractionError::Corrupt(format!("PDF extraction aborted: {e}")))?
                    .map_err(|e| ExtractionError::Corrupt(e.to_string()))?
            }
            DocumentKind::Text => String::from_utf8(bytes.to_vec())
                .map_err(|e| ExtractionError::Corrupt(format!("invalid UTF-8: {e}")))?,
            DocumentKind::Inline => return Err(ExtractionError::Unsupported(kind.as_str())),
        };

        non_empty(text)
    }
}

/// Trims extracted text and rejects documents with nothing left.
pub fn non_empty(text: String) -> Result<String, ExtractionError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(trimmed.to_string())
}
