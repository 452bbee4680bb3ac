use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::fingerprint;
use crate::errors::AppError;
use crate::models::enhancement::{EnhancementKind, Language, OperationClass, TransformMode};
use crate::models::submission::Submission;

/// Longest job focus accepted, in characters.
pub const MAX_JOB_FOCUS_CHARS: usize = 5000;

/// A caller's request to transform a submission's text.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformRequest {
    #[serde(skip)]
    pub submission_id: Uuid,
    pub user_id: Uuid,
    pub kind: EnhancementKind,
    #[serde(default)]
    pub mode: TransformMode,
    #[serde(default)]
    pub job_focus: Option<String>,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub force_refresh: bool,
}

impl TransformRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.kind == EnhancementKind::Translate
            && self.language.map_or(true, |l| l == Language::Original)
        {
            return Err(AppError::Validation(
                "A target language is required for translation".to_string(),
            ));
        }
        if let Some(focus) = &self.job_focus {
            if focus.chars().count() > MAX_JOB_FOCUS_CHARS {
                return Err(AppError::Validation(format!(
                    "Job focus must be at most {MAX_JOB_FOCUS_CHARS} characters"
                )));
            }
        }
        Ok(())
    }

    /// Job focus with surrounding whitespace removed; blank counts as absent.
    pub fn job_focus(&self) -> Option<&str> {
        self.job_focus
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    pub fn language(&self) -> Language {
        self.language.unwrap_or_default()
    }
}

/// Semantic inputs of a transform, reduced to the canonical payload that keys
/// both the cache and record reuse.
#[derive(Debug, Clone)]
pub struct TransformInput {
    pub class: OperationClass,
    pub payload: String,
    /// Structured view handed to suggestion generators.
    pub structured: Value,
    /// The parse stage's output, when it found anything.
    pub parsed: Option<Value>,
}

#[derive(Serialize)]
struct RewritePayload<'a> {
    text: &'a str,
    job_focus: Option<&'a str>,
    language: Language,
}

#[derive(Serialize)]
struct TranslatePayload<'a> {
    text: &'a str,
    language: Language,
}

#[derive(Serialize)]
struct SuggestPayload<'a> {
    structured: &'a Value,
    job_focus: Option<&'a str>,
}

impl TransformInput {
    /// Builds the canonical input for `request` against `submission`'s text.
    /// Suggestions prefer the parsed structure and fall back to the raw text.
    pub fn new(request: &TransformRequest, submission: &Submission, text: &str) -> Self {
        let class = request.kind.operation_class();
        let structured = submission
            .parsed
            .clone()
            .unwrap_or_else(|| json!({ "raw_text": text }));
        let parsed = submission.parsed.clone().filter(has_content);

        let payload = match request.kind {
            EnhancementKind::Rewrite => to_canonical(&RewritePayload {
                text,
                job_focus: request.job_focus(),
                language: request.language(),
            }),
            EnhancementKind::Translate => to_canonical(&TranslatePayload {
                text,
                language: request.language(),
            }),
            EnhancementKind::Suggest => to_canonical(&SuggestPayload {
                structured: &structured,
                job_focus: request.job_focus(),
            }),
        };

        Self {
            class,
            payload,
            structured,
            parsed,
        }
    }

    pub fn fingerprint(&self, mode: TransformMode) -> String {
        fingerprint(self.class, &self.payload, mode)
    }
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn to_canonical<T: Serialize>(payload: &T) -> String {
    // Struct fields serialize in declaration order and serde_json maps are
    // sorted, so equal inputs always yield the same string.
    serde_json::to_string(payload).unwrap_or_default()
}

/// Cache encoding for suggestion lists.
pub fn encode_suggestions(suggestions: &[String]) -> String {
    json!({ "suggestions": suggestions }).to_string()
}

pub fn decode_suggestions(cached: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(cached).ok()?;
    serde_json::from_value(value.get("suggestions")?.clone()).ok()
}

#[derive(Deserialize)]
struct CachedRewrite {
    text: String,
    #[serde(default)]
    suggestions: Option<Vec<String>>,
}

/// Cache encoding for rewrites, which may carry suggestions alongside the text.
pub fn encode_rewrite(text: &str, suggestions: Option<&[String]>) -> String {
    json!({ "text": text, "suggestions": suggestions }).to_string()
}

pub fn decode_rewrite(cached: &str) -> Option<(String, Option<Vec<String>>)> {
    let entry: CachedRewrite = serde_json::from_str(cached).ok()?;
    Some((entry.text, entry.suggestions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::submission::{DocumentKind, SubmissionStage, INLINE_LOCATOR};
    use chrono::Utc;

    fn request(kind: EnhancementKind) -> TransformRequest {
        TransformRequest {
            submission_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind,
            mode: TransformMode::Local,
            job_focus: None,
            language: None,
            force_refresh: false,
        }
    }

    fn submission(parsed: Option<Value>) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            source_locator: INLINE_LOCATOR.to_string(),
            document_kind: DocumentKind::Inline,
            raw_text: Some("Worked on APIs".to_string()),
            parsed,
            parse_error: false,
            stage: SubmissionStage::ParseDone,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_translate_requires_target_language() {
        let mut req = request(EnhancementKind::Translate);
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
        req.language = Some(Language::Original);
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
        req.language = Some(Language::Zh);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_job_focus_length_is_bounded() {
        let mut req = request(EnhancementKind::Rewrite);
        req.job_focus = Some("a".repeat(MAX_JOB_FOCUS_CHARS));
        assert!(req.validate().is_ok());
        req.job_focus = Some("a".repeat(MAX_JOB_FOCUS_CHARS + 1));
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_payload_ignores_focus_whitespace() {
        let sub = submission(None);
        let mut a = request(EnhancementKind::Rewrite);
        a.job_focus = Some("Backend".to_string());
        let mut b = a.clone();
        b.job_focus = Some("  Backend \n".to_string());
        let ia = TransformInput::new(&a, &sub, "text");
        let ib = TransformInput::new(&b, &sub, "text");
        assert_eq!(ia.payload, ib.payload);
        assert_eq!(
            ia.fingerprint(TransformMode::Gpt),
            ib.fingerprint(TransformMode::Gpt)
        );
    }

    #[test]
    fn test_payload_distinguishes_language_and_focus() {
        let sub = submission(None);
        let base = request(EnhancementKind::Rewrite);
        let mut zh = base.clone();
        zh.language = Some(Language::Zh);
        let mut focused = base.clone();
        focused.job_focus = Some("SRE".to_string());

        let p = |r: &TransformRequest| TransformInput::new(r, &sub, "text").payload;
        assert_ne!(p(&base), p(&zh));
        assert_ne!(p(&base), p(&focused));
    }

    #[test]
    fn test_suggest_uses_parsed_structure_when_present() {
        let parsed = json!({"skills": ["Rust"]});
        let input = TransformInput::new(
            &request(EnhancementKind::Suggest),
            &submission(Some(parsed.clone())),
            "text",
        );
        assert_eq!(input.class, OperationClass::Suggestions);
        assert_eq!(input.structured, parsed);

        let raw = TransformInput::new(&request(EnhancementKind::Suggest), &submission(None), "text");
        assert_eq!(raw.structured, json!({"raw_text": "text"}));
    }

    #[test]
    fn test_empty_parse_result_counts_as_absent() {
        let rewrite = request(EnhancementKind::Rewrite);
        for empty in [json!({}), json!([]), Value::Null] {
            let input = TransformInput::new(&rewrite, &submission(Some(empty)), "text");
            assert!(input.parsed.is_none());
        }
        let parsed = json!({"skills": ["Rust"]});
        let input = TransformInput::new(&rewrite, &submission(Some(parsed.clone())), "text");
        assert_eq!(input.parsed, Some(parsed));
    }

    #[test]
    fn test_rewrite_cache_encoding_keeps_suggestions() {
        let list = vec!["Quantify impact".to_string()];
        let encoded = encode_rewrite("# Resume", Some(&list));
        assert_eq!(
            decode_rewrite(&encoded),
            Some(("# Resume".to_string(), Some(list)))
        );
        assert_eq!(
            decode_rewrite(&encode_rewrite("# Resume", None)),
            Some(("# Resume".to_string(), None))
        );
        assert_eq!(decode_rewrite("# Resume"), None);
    }

    #[test]
    fn test_suggestion_cache_encoding() {
        let list = vec!["Learn Go".to_string(), "Add metrics".to_string()];
        assert_eq!(decode_suggestions(&encode_suggestions(&list)), Some(list));
        assert_eq!(decode_suggestions("plain text"), None);
    }
}
