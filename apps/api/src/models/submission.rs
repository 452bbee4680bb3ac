use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Locator recorded for submissions that arrived as pasted text rather than a file.
pub const INLINE_LOCATOR: &str = "text-input";

/// How the submitted document was provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Text,
    Inline,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Text => "text",
            DocumentKind::Inline => "inline",
        }
    }

    /// File extension used when the upload is written to blob storage.
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => ".pdf",
            DocumentKind::Text => ".txt",
            DocumentKind::Inline => "",
        }
    }

    /// Classifies an upload by declared content type, falling back to the file extension.
    /// Returns `None` for anything that is neither PDF nor plain text.
    pub fn from_upload(content_type: Option<&str>, file_name: Option<&str>) -> Option<Self> {
        match content_type.map(|ct| ct.trim().to_ascii_lowercase()).as_deref() {
            Some("application/pdf") => return Some(DocumentKind::Pdf),
            Some("text/plain") => return Some(DocumentKind::Text),
            Some(ct) if ct.starts_with("text/plain;") => return Some(DocumentKind::Text),
            _ => {}
        }

        let extension = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())?;
        match extension.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" | "text" | "md" => Some(DocumentKind::Text),
            _ => None,
        }
    }
}

impl FromStr for DocumentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(DocumentKind::Pdf),
            "text" => Ok(DocumentKind::Text),
            "inline" => Ok(DocumentKind::Inline),
            other => Err(anyhow!("unknown document kind '{other}'")),
        }
    }
}

/// Lifecycle of a submission through the two background stages.
///
/// ```text
/// Ingested → ExtractionPending → ExtractionFailed
///                              → ExtractionDone → ParsePending → ParseFailed
///                                                              → ParseDone
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStage {
    Ingested,
    ExtractionPending,
    ExtractionFailed,
    ExtractionDone,
    ParsePending,
    ParseFailed,
    ParseDone,
}

impl SubmissionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStage::Ingested => "ingested",
            SubmissionStage::ExtractionPending => "extraction_pending",
            SubmissionStage::ExtractionFailed => "extraction_failed",
            SubmissionStage::ExtractionDone => "extraction_done",
            SubmissionStage::ParsePending => "parse_pending",
            SubmissionStage::ParseFailed => "parse_failed",
            SubmissionStage::ParseDone => "parse_done",
        }
    }

    /// The only stage a submission may be in immediately before entering `self`.
    pub fn predecessor(&self) -> Option<SubmissionStage> {
        match self {
            SubmissionStage::Ingested => None,
            SubmissionStage::ExtractionPending => Some(SubmissionStage::Ingested),
            SubmissionStage::ExtractionFailed | SubmissionStage::ExtractionDone => {
                Some(SubmissionStage::ExtractionPending)
            }
            SubmissionStage::ParsePending => Some(SubmissionStage::ExtractionDone),
            SubmissionStage::ParseFailed | SubmissionStage::ParseDone => {
                Some(SubmissionStage::ParsePending)
            }
        }
    }

    /// Failed stages set the submission's error flag.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SubmissionStage::ExtractionFailed | SubmissionStage::ParseFailed
        )
    }
}

impl FromStr for SubmissionStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingested" => Ok(SubmissionStage::Ingested),
            "extraction_pending" => Ok(SubmissionStage::ExtractionPending),
            "extraction_failed" => Ok(SubmissionStage::ExtractionFailed),
            "extraction_done" => Ok(SubmissionStage::ExtractionDone),
            "parse_pending" => Ok(SubmissionStage::ParsePending),
            "parse_failed" => Ok(SubmissionStage::ParseFailed),
            "parse_done" => Ok(SubmissionStage::ParseDone),
            other => Err(anyhow!("unknown submission stage '{other}'")),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SubmissionRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub source_locator: String,
    pub document_kind: String,
    pub raw_text: Option<String>,
    pub parsed: Option<Value>,
    pub parse_error: bool,
    pub stage: String,
    pub created_at: DateTime<Utc>,
}

/// One user-provided document and the output of its background stages.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub source_locator: String,
    pub document_kind: DocumentKind,
    pub raw_text: Option<String>,
    pub parsed: Option<Value>,
    pub parse_error: bool,
    pub stage: SubmissionStage,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Extracted text, if extraction has produced anything usable.
    pub fn text(&self) -> Option<&str> {
        self.raw_text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = anyhow::Error;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        Ok(Submission {
            id: row.id,
            owner_id: row.owner_id,
            source_locator: row.source_locator,
            document_kind: row.document_kind.parse()?,
            raw_text: row.raw_text,
            parsed: row.parsed,
            parse_error: row.parse_error,
            stage: row.stage.parse()?,
            created_at: row.created_at,
        })
    }
}

/// Fields supplied when a submission is first persisted (always in `Ingested`).
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub owner_id: Uuid,
    pub source_locator: String,
    pub document_kind: DocumentKind,
    pub raw_text: Option<String>,
}
