use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// What a transform does to the submission text. Stored on every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementKind {
    Rewrite,
    Translate,
    Suggest,
}

impl EnhancementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnhancementKind::Rewrite => "rewrite",
            EnhancementKind::Translate => "translate",
            EnhancementKind::Suggest => "suggest",
        }
    }

    pub fn operation_class(&self) -> OperationClass {
        match self {
            EnhancementKind::Rewrite => OperationClass::Enhance,
            EnhancementKind::Translate => OperationClass::Translate,
            EnhancementKind::Suggest => OperationClass::Suggestions,
        }
    }
}

impl FromStr for EnhancementKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rewrite" => Ok(EnhancementKind::Rewrite),
            "translate" => Ok(EnhancementKind::Translate),
            "suggest" => Ok(EnhancementKind::Suggest),
            other => Err(anyhow!("unknown enhancement kind '{other}'")),
        }
    }
}

/// Namespace for cache keys. Equal payloads in different classes never share an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Enhance,
    Translate,
    Suggestions,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Enhance => "enhance",
            OperationClass::Translate => "translate",
            OperationClass::Suggestions => "suggestions",
        }
    }
}

/// Output language of a record. `Original` means the text was left in its source language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Original,
    En,
    Zh,
    Es,
    Fr,
    De,
    Ja,
    Ko,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Original => "original",
            Language::En => "en",
            Language::Zh => "zh",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
            Language::Ja => "ja",
            Language::Ko => "ko",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Original => "Original",
            Language::En => "English",
            Language::Zh => "Chinese (Simplified)",
            Language::Es => "Spanish",
            Language::Fr => "French",
            Language::De => "German",
            Language::Ja => "Japanese",
            Language::Ko => "Korean",
        }
    }

    /// Source text and English need no explicit output-language instruction.
    pub fn is_default(&self) -> bool {
        matches!(self, Language::Original | Language::En)
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(Language::Original),
            "en" => Ok(Language::En),
            "zh" => Ok(Language::Zh),
            "es" => Ok(Language::Es),
            "fr" => Ok(Language::Fr),
            "de" => Ok(Language::De),
            "ja" => Ok(Language::Ja),
            "ko" => Ok(Language::Ko),
            other => Err(anyhow!(
                "unsupported language '{other}' (expected one of: en, zh, es, fr, de, ja, ko)"
            )),
        }
    }
}

/// Requested transform path. `Gpt` asks for the external generator; `Local` never calls it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
    Gpt,
    #[default]
    Local,
}

impl TransformMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformMode::Gpt => "gpt",
            TransformMode::Local => "local",
        }
    }
}

/// Which path produced a record's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Generated,
    Fallback,
    Cached,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::Generated => "generated",
            RecordOrigin::Fallback => "fallback",
            RecordOrigin::Cached => "cached",
        }
    }
}

impl FromStr for RecordOrigin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(RecordOrigin::Generated),
            "fallback" => Ok(RecordOrigin::Fallback),
            "cached" => Ok(RecordOrigin::Cached),
            other => Err(anyhow!("unknown record origin '{other}'")),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EnhancementRecordRow {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub version: i32,
    pub kind: String,
    pub language: String,
    pub text: String,
    pub suggestions: Option<Value>,
    pub origin: String,
    pub request_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// One immutable transform output. Never updated; a new transform appends a new version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancementRecord {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub version: i32,
    pub kind: EnhancementKind,
    pub language: Language,
    pub text: String,
    pub suggestions: Option<Vec<String>>,
    pub origin: RecordOrigin,
    pub request_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EnhancementRecordRow> for EnhancementRecord {
    type Error = anyhow::Error;

    fn try_from(row: EnhancementRecordRow) -> Result<Self, Self::Error> {
        let suggestions = row
            .suggestions
            .map(serde_json::from_value::<Vec<String>>)
            .transpose()?;
        Ok(EnhancementRecord {
            id: row.id,
            submission_id: row.submission_id,
            version: row.version,
            kind: row.kind.parse()?,
            language: row.language.parse()?,
            text: row.text,
            suggestions,
            origin: row.origin.parse()?,
            request_fingerprint: row.request_fingerprint,
            created_at: row.created_at,
        })
    }
}

/// Fields supplied when persisting a record; id, version and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewEnhancementRecord {
    pub submission_id: Uuid,
    pub kind: EnhancementKind,
    pub language: Language,
    pub text: String,
    pub suggestions: Option<Vec<String>>,
    pub origin: RecordOrigin,
    pub request_fingerprint: String,
}
