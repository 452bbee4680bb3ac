//! The enhancement pipeline: ingest, background stages, and on-demand transforms.
//!
//! A transform request moves through:
//!
//! ```text
//! Requested → CacheHit                                  → record (origin: cached)
//!           → CacheMiss → QuotaDenied                    → 429, no record
//!                       → QuotaGranted → Generated       → record (origin: generated)
//!                                      → GenerationFailed → FallbackApplied → record (origin: fallback)
//! ```
//!
//! Local mode and an unconfigured generator go straight to the fallback path.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::enhancement::fallback::{render_suggestions, LocalFallback};
use crate::enhancement::export::{self, RecordExport};
use crate::enhancement::request::{
    decode_rewrite, decode_suggestions, encode_rewrite, encode_suggestions, TransformInput,
    TransformRequest,
};
use crate::errors::AppError;
use crate::llm_client::{parse_suggestions, GenerationError, GenerationRequest, Generator};
use crate::models::enhancement::{
    EnhancementKind, EnhancementRecord, Language, NewEnhancementRecord, RecordOrigin,
    TransformMode,
};
use crate::models::submission::{DocumentKind, NewSubmission, Submission, INLINE_LOCATOR};
use crate::quota::{time_until_reset, QuotaClass, QuotaTracker};
use crate::repository::Repository;
use crate::submission::blob::BlobStore;
use crate::submission::stages::{ExtractionSource, StageRunner};

/// Blob-store folder for uploaded documents.
const UPLOAD_FOLDER: &str = "resumes";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// When a non-forced transform returns an existing record instead of producing a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusePolicy {
    /// Reuse the newest record of the requested kind, whatever produced it.
    LatestOfKind,
    /// Reuse the newest record of the kind whose request fingerprint matches.
    #[default]
    MatchingRequest,
}

impl FromStr for ReusePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest_of_kind" => Ok(ReusePolicy::LatestOfKind),
            "matching_request" => Ok(ReusePolicy::MatchingRequest),
            other => Err(anyhow!(
                "unknown reuse policy '{other}' (expected latest_of_kind or matching_request)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub max_upload_bytes: usize,
    pub reuse_policy: ReusePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            reuse_policy: ReusePolicy::default(),
        }
    }
}

/// A document handed to `ingest`.
#[derive(Debug, Clone)]
pub enum SubmissionSource {
    Upload {
        bytes: Bytes,
        file_name: Option<String>,
        content_type: Option<String>,
    },
    Text(String),
}

/// Output of one transform, before it is persisted.
#[derive(Debug, Clone)]
struct TransformOutput {
    text: String,
    suggestions: Option<Vec<String>>,
}

impl TransformOutput {
    fn plain(text: String) -> Self {
        Self {
            text,
            suggestions: None,
        }
    }

    fn suggestions(list: Vec<String>) -> Self {
        Self {
            text: render_suggestions(&list),
            suggestions: Some(list),
        }
    }

    fn cache_value(&self, kind: EnhancementKind) -> String {
        match kind {
            EnhancementKind::Rewrite => encode_rewrite(&self.text, self.suggestions.as_deref()),
            EnhancementKind::Translate => self.text.clone(),
            EnhancementKind::Suggest => {
                encode_suggestions(self.suggestions.as_deref().unwrap_or_default())
            }
        }
    }

    fn from_cached(kind: EnhancementKind, cached: String) -> Option<Self> {
        match kind {
            EnhancementKind::Rewrite => {
                decode_rewrite(&cached).map(|(text, suggestions)| Self { text, suggestions })
            }
            EnhancementKind::Translate => Some(Self::plain(cached)),
            EnhancementKind::Suggest => decode_suggestions(&cached).map(Self::suggestions),
        }
    }
}

pub struct EnhancementPipeline {
    repository: Arc<dyn Repository>,
    blobs: Arc<dyn BlobStore>,
    stages: StageRunner,
    generator: Arc<dyn Generator>,
    fallback: LocalFallback,
    cache: ResponseCache,
    quota: QuotaTracker,
    settings: PipelineSettings,
}

impl EnhancementPipeline {
    pub fn new(
        repository: Arc<dyn Repository>,
        blobs: Arc<dyn BlobStore>,
        stages: StageRunner,
        generator: Arc<dyn Generator>,
        cache: ResponseCache,
        quota: QuotaTracker,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            repository,
            blobs,
            stages,
            generator,
            fallback: LocalFallback,
            cache,
            quota,
            settings,
        }
    }

    pub fn generator_available(&self) -> bool {
        self.generator.available()
    }

    // ────────────────────────────────────────────────────────────────────────
    // Ingest
    // ────────────────────────────────────────────────────────────────────────

    /// Persists a new submission and schedules extraction. Returns before any
    /// background stage has run.
    pub async fn ingest(
        &self,
        owner: Uuid,
        source: SubmissionSource,
    ) -> Result<Submission, AppError> {
        match source {
            SubmissionSource::Upload {
                bytes,
                file_name,
                content_type,
            } => {
                if bytes.is_empty() {
                    return Err(AppError::Validation(
                        "Please select a file to upload".to_string(),
                    ));
                }
                self.check_size(bytes.len())?;
                let kind = DocumentKind::from_upload(content_type.as_deref(), file_name.as_deref())
                    .ok_or_else(|| {
                        AppError::Validation("Only PDF and text files are supported".to_string())
                    })?;

                let locator = self
                    .blobs
                    .store(bytes, UPLOAD_FOLDER, kind.extension())
                    .await?;
                let submission = self
                    .repository
                    .insert_submission(NewSubmission {
                        owner_id: owner,
                        source_locator: locator.clone(),
                        document_kind: kind,
                        raw_text: None,
                    })
                    .await?;

                info!(
                    "Ingested {} upload as submission {} for user {owner}",
                    kind.as_str(),
                    submission.id
                );
                self.stages
                    .schedule_extraction(submission.id, ExtractionSource::Blob { locator, kind });
                Ok(submission)
            }
            SubmissionSource::Text(text) => {
                if text.trim().is_empty() {
                    return Err(AppError::Validation("Text must not be empty".to_string()));
                }
                self.check_size(text.len())?;

                let submission = self
                    .repository
                    .insert_submission(NewSubmission {
                        owner_id: owner,
                        source_locator: INLINE_LOCATOR.to_string(),
                        document_kind: DocumentKind::Inline,
                        raw_text: None,
                    })
                    .await?;

                info!(
                    "Ingested inline text as submission {} for user {owner}",
                    submission.id
                );
                self.stages
                    .schedule_extraction(submission.id, ExtractionSource::Inline(text));
                Ok(submission)
            }
        }
    }

    fn check_size(&self, len: usize) -> Result<(), AppError> {
        if len > self.settings.max_upload_bytes {
            return Err(AppError::Validation(format!(
                "Document must be smaller than {} bytes",
                self.settings.max_upload_bytes
            )));
        }
        Ok(())
    }

    pub async fn get_submission(&self, id: Uuid, owner: Uuid) -> Result<Submission, AppError> {
        self.repository
            .find_submission(id, owner)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Submission {id} not found")))
    }

    pub async fn list_submissions(&self, owner: Uuid) -> Result<Vec<Submission>, AppError> {
        Ok(self.repository.list_submissions(owner).await?)
    }

    /// Every record of the submission, newest first.
    pub async fn list_versions(
        &self,
        submission_id: Uuid,
        owner: Uuid,
    ) -> Result<Vec<EnhancementRecord>, AppError> {
        self.get_submission(submission_id, owner).await?;
        Ok(self.repository.list_records(submission_id).await?)
    }

    pub async fn get_record(&self, id: Uuid, owner: Uuid) -> Result<EnhancementRecord, AppError> {
        self.repository
            .find_record(id, owner)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Enhancement record {id} not found")))
    }

    /// The record's text as a downloadable markdown document.
    pub async fn export_markdown(&self, id: Uuid, owner: Uuid) -> Result<RecordExport, AppError> {
        let record = self.get_record(id, owner).await?;
        Ok(export::markdown(&record, Utc::now()))
    }

    /// An HTML page setting the submission's original text beside the record's text.
    pub async fn export_comparison(
        &self,
        id: Uuid,
        owner: Uuid,
    ) -> Result<RecordExport, AppError> {
        let record = self.get_record(id, owner).await?;
        let submission = self.get_submission(record.submission_id, owner).await?;
        let original = submission
            .raw_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::Validation("Original text not available".to_string()))?;
        Ok(export::comparison(original, &record))
    }

    // ────────────────────────────────────────────────────────────────────────
    // Transform
    // ────────────────────────────────────────────────────────────────────────

    pub async fn request_transform(
        &self,
        request: TransformRequest,
    ) -> Result<EnhancementRecord, AppError> {
        request.validate()?;

        let submission = self
            .get_submission(request.submission_id, request.user_id)
            .await?;
        let text = submission
            .text()
            .ok_or_else(|| {
                AppError::Validation("Submission text is not available yet".to_string())
            })?
            .to_string();

        let input = TransformInput::new(&request, &submission, &text);
        let request_fingerprint = input.fingerprint(request.mode);

        if !request.force_refresh {
            if let Some(existing) = self.reusable(&request, &request_fingerprint).await? {
                info!(
                    "Reusing {} version {} for submission {}",
                    existing.kind.as_str(),
                    existing.version,
                    submission.id
                );
                return Ok(existing);
            }
        }

        if let Some(cached) = self
            .cache
            .get(input.class, &input.payload, request.mode)
            .await
        {
            match TransformOutput::from_cached(request.kind, cached) {
                Some(output) => {
                    return self
                        .persist(
                            &request,
                            output,
                            RecordOrigin::Cached,
                            request.mode,
                            request_fingerprint,
                        )
                        .await;
                }
                None => warn!(
                    "Ignoring undecodable cached {} entry for submission {}",
                    input.class.as_str(),
                    submission.id
                ),
            }
        }

        let (output, origin, produced_by) = self.produce(&request, &input, &text).await?;

        self.cache
            .put(
                input.class,
                &input.payload,
                produced_by,
                &output.cache_value(request.kind),
                None,
            )
            .await;

        let record = self
            .persist(&request, output, origin, produced_by, request_fingerprint)
            .await?;
        // Usage is only counted once the record is stored.
        if origin == RecordOrigin::Generated {
            self.quota
                .consume(request.user_id, QuotaClass::Generative)
                .await;
        }
        self.quota
            .consume(request.user_id, QuotaClass::AnyTransform)
            .await;
        Ok(record)
    }

    async fn reusable(
        &self,
        request: &TransformRequest,
        request_fingerprint: &str,
    ) -> anyhow::Result<Option<EnhancementRecord>> {
        match self.settings.reuse_policy {
            ReusePolicy::LatestOfKind => {
                self.repository
                    .latest_record(request.submission_id, request.kind)
                    .await
            }
            ReusePolicy::MatchingRequest => {
                self.repository
                    .latest_matching_record(request.submission_id, request.kind, request_fingerprint)
                    .await
            }
        }
    }

    /// Generate-or-fallback. Returns the output, its origin, and the mode that
    /// actually produced it (the fallback always counts as local).
    async fn produce(
        &self,
        request: &TransformRequest,
        input: &TransformInput,
        text: &str,
    ) -> Result<(TransformOutput, RecordOrigin, TransformMode), AppError> {
        if request.mode == TransformMode::Gpt {
            if self.generator.available() {
                if !self
                    .quota
                    .allowed(request.user_id, QuotaClass::Generative)
                    .await
                {
                    return Err(AppError::QuotaExceeded {
                        class: QuotaClass::Generative,
                        retry_after_secs: time_until_reset(Utc::now()).as_secs(),
                    });
                }

                match self.generate(request, input, text).await {
                    Ok(output) => {
                        return Ok((output, RecordOrigin::Generated, TransformMode::Gpt));
                    }
                    Err(e) => warn!(
                        "Generator failed for submission {}, applying local fallback: {e}",
                        request.submission_id
                    ),
                }
            } else {
                info!("Generator not configured, applying local fallback");
            }
        }

        let output = self.apply_fallback(request, input, text);
        Ok((output, RecordOrigin::Fallback, TransformMode::Local))
    }

    async fn generate(
        &self,
        request: &TransformRequest,
        input: &TransformInput,
        text: &str,
    ) -> Result<TransformOutput, GenerationError> {
        match request.kind {
            EnhancementKind::Rewrite => {
                let generated = self
                    .generator
                    .generate(&GenerationRequest::Enhance {
                        source_text: text,
                        job_focus: request.job_focus(),
                        language: request.language(),
                    })
                    .await?;
                let suggestions = match &input.parsed {
                    Some(parsed) => self.rewrite_suggestions(request, parsed).await,
                    None => None,
                };
                Ok(TransformOutput {
                    text: generated,
                    suggestions,
                })
            }
            EnhancementKind::Translate => {
                let generated = self
                    .generator
                    .generate(&GenerationRequest::Translate {
                        text,
                        language: request.language(),
                    })
                    .await?;
                Ok(TransformOutput::plain(generated))
            }
            EnhancementKind::Suggest => {
                let raw = self
                    .generator
                    .generate(&GenerationRequest::Suggestions {
                        structured: &input.structured,
                        job_focus: request.job_focus(),
                    })
                    .await?;
                Ok(TransformOutput::suggestions(parse_suggestions(&raw)?))
            }
        }
    }

    /// Suggestions attached to a generated rewrite. A failure here keeps the
    /// rewrite and drops only the suggestions.
    async fn rewrite_suggestions(
        &self,
        request: &TransformRequest,
        parsed: &Value,
    ) -> Option<Vec<String>> {
        let raw = self
            .generator
            .generate(&GenerationRequest::Suggestions {
                structured: parsed,
                job_focus: request.job_focus(),
            })
            .await;
        match raw.and_then(|raw| parse_suggestions(&raw)) {
            Ok(list) => Some(list),
            Err(e) => {
                warn!(
                    "Rewrite suggestions failed for submission {}: {e}",
                    request.submission_id
                );
                None
            }
        }
    }

    fn apply_fallback(
        &self,
        request: &TransformRequest,
        input: &TransformInput,
        text: &str,
    ) -> TransformOutput {
        match request.kind {
            EnhancementKind::Rewrite => {
                TransformOutput::plain(self.fallback.enhance(text, request.job_focus()))
            }
            EnhancementKind::Translate => {
                TransformOutput::plain(self.fallback.translate(text, request.language()))
            }
            EnhancementKind::Suggest => TransformOutput::suggestions(self.fallback.suggest(
                Some(&input.structured),
                text,
                request.job_focus(),
            )),
        }
    }

    async fn persist(
        &self,
        request: &TransformRequest,
        output: TransformOutput,
        origin: RecordOrigin,
        produced_by: TransformMode,
        request_fingerprint: String,
    ) -> Result<EnhancementRecord, AppError> {
        let record = self
            .repository
            .insert_record(NewEnhancementRecord {
                submission_id: request.submission_id,
                kind: request.kind,
                language: record_language(request, produced_by),
                text: output.text,
                suggestions: output.suggestions,
                origin,
                request_fingerprint,
            })
            .await?;

        info!(
            "Stored {} version {} ({}) for submission {}",
            record.kind.as_str(),
            record.version,
            record.origin.as_str(),
            record.submission_id
        );
        Ok(record)
    }
}

/// Language a record's text is actually written in. The local rewrite never
/// changes language, so only generated rewrites honour the requested one.
fn record_language(request: &TransformRequest, produced_by: TransformMode) -> Language {
    match request.kind {
        EnhancementKind::Rewrite if produced_by == TransformMode::Gpt => request.language(),
        EnhancementKind::Rewrite | EnhancementKind::Suggest => Language::Original,
        EnhancementKind::Translate => request.language(),
    }
}
