//! In-memory fakes and a pipeline harness shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::enhancement::{EnhancementPipeline, PipelineSettings, ReusePolicy};
use crate::llm_client::{GenerationError, GenerationRequest, Generator};
use crate::models::enhancement::{EnhancementKind, EnhancementRecord, NewEnhancementRecord};
use crate::models::submission::{
    DocumentKind, NewSubmission, Submission, SubmissionStage, INLINE_LOCATOR,
};
use crate::quota::{QuotaLimits, QuotaTracker};
use crate::repository::Repository;
use crate::state::AppState;
use crate::store::memory::MemoryStore;
use crate::store::SharedStore;
use crate::submission::blob::{object_key, BlobStore};
use crate::submission::extraction::DocumentTextExtractor;
use crate::submission::parser::{ParseError, StructuredParser};
use crate::submission::stages::{StagePool, StageRunner};

const STAGE_WAIT: Duration = Duration::from_secs(5);

/// Serves `app` on an ephemeral local port and returns its address.
pub async fn serve_local(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn inline_submission(text: &str) -> Submission {
    Submission {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        source_locator: INLINE_LOCATOR.to_string(),
        document_kind: DocumentKind::Inline,
        raw_text: Some(text.to_string()),
        parsed: Some(json!({})),
        parse_error: false,
        stage: SubmissionStage::ParseDone,
        created_at: Utc::now(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Repository
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryRepository {
    submissions: Mutex<HashMap<Uuid, Submission>>,
    records: Mutex<Vec<EnhancementRecord>>,
    reject_records: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Submission> {
        self.submissions.lock().unwrap().get(&id).cloned()
    }

    /// Makes every later `insert_record` fail.
    pub fn reject_record_inserts(&self) {
        self.reject_records.store(true, Ordering::SeqCst);
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    /// An uploaded submission whose extraction has started but not finished.
    pub fn insert_pending_upload(&self, owner: Uuid) -> Uuid {
        let submission = Submission {
            id: Uuid::new_v4(),
            owner_id: owner,
            source_locator: object_key("resumes", ".pdf"),
            document_kind: DocumentKind::Pdf,
            raw_text: None,
            parsed: None,
            parse_error: false,
            stage: SubmissionStage::ExtractionPending,
            created_at: Utc::now(),
        };
        let id = submission.id;
        self.submissions.lock().unwrap().insert(id, submission);
        id
    }

    /// Polls until the submission reaches `stage`. Panics after a few seconds.
    pub async fn wait_for_stage(&self, id: Uuid, stage: SubmissionStage) -> Submission {
        let waited = tokio::time::timeout(STAGE_WAIT, async {
            loop {
                if let Some(submission) = self.snapshot(id) {
                    if submission.stage == stage {
                        return submission;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        match waited {
            Ok(submission) => submission,
            Err(_) => panic!(
                "submission {id} never reached {} (now {:?})",
                stage.as_str(),
                self.snapshot(id).map(|s| s.stage)
            ),
        }
    }

    fn update<F>(&self, id: Uuid, from: SubmissionStage, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Submission),
    {
        let mut submissions = self.submissions.lock().unwrap();
        let submission = submissions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("submission {id} does not exist"))?;
        if submission.stage != from {
            bail!(
                "submission {id} is not in stage '{}', found '{}'",
                from.as_str(),
                submission.stage.as_str()
            );
        }
        apply(submission);
        Ok(())
    }

    fn newest<P>(&self, matches: P) -> Option<EnhancementRecord>
    where
        P: Fn(&EnhancementRecord) -> bool,
    {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches(r))
            .max_by_key(|r| r.version)
            .cloned()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_submission(&self, new: NewSubmission) -> Result<Submission> {
        let submission = Submission {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            source_locator: new.source_locator,
            document_kind: new.document_kind,
            raw_text: new.raw_text,
            parsed: None,
            parse_error: false,
            stage: SubmissionStage::Ingested,
            created_at: Utc::now(),
        };
        self.submissions
            .lock()
            .unwrap()
            .insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn find_submission(&self, id: Uuid, owner: Uuid) -> Result<Option<Submission>> {
        Ok(self.snapshot(id).filter(|s| s.owner_id == owner))
    }

    async fn list_submissions(&self, owner: Uuid) -> Result<Vec<Submission>> {
        let mut owned: Vec<Submission> = self
            .submissions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.owner_id == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn mark_stage(&self, id: Uuid, stage: SubmissionStage) -> Result<()> {
        let Some(from) = stage.predecessor() else {
            bail!("stage '{}' cannot be entered after ingest", stage.as_str());
        };
        self.update(id, from, |s| {
            s.stage = stage;
            s.parse_error |= stage.is_failure();
        })
    }

    async fn store_raw_text(&self, id: Uuid, text: &str) -> Result<()> {
        self.update(id, SubmissionStage::ExtractionPending, |s| {
            s.raw_text = Some(text.to_string());
            s.parse_error = false;
            s.stage = SubmissionStage::ExtractionDone;
        })
    }

    async fn store_parsed(&self, id: Uuid, parsed: &Value) -> Result<()> {
        self.update(id, SubmissionStage::ParsePending, |s| {
            s.parsed = Some(parsed.clone());
            s.stage = SubmissionStage::ParseDone;
        })
    }

    async fn insert_record(&self, new: NewEnhancementRecord) -> Result<EnhancementRecord> {
        if self.reject_records.load(Ordering::SeqCst) {
            bail!("record storage unavailable");
        }
        let mut records = self.records.lock().unwrap();
        let version = records
            .iter()
            .filter(|r| r.submission_id == new.submission_id)
            .map(|r| r.version)
            .max()
            .unwrap_or(0)
            + 1;
        let record = EnhancementRecord {
            id: Uuid::new_v4(),
            submission_id: new.submission_id,
            version,
            kind: new.kind,
            language: new.language,
            text: new.text,
            suggestions: new.suggestions,
            origin: new.origin,
            request_fingerprint: new.request_fingerprint,
            created_at: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn latest_record(
        &self,
        submission_id: Uuid,
        kind: EnhancementKind,
    ) -> Result<Option<EnhancementRecord>> {
        Ok(self.newest(|r| r.submission_id == submission_id && r.kind == kind))
    }

    async fn latest_matching_record(
        &self,
        submission_id: Uuid,
        kind: EnhancementKind,
        request_fingerprint: &str,
    ) -> Result<Option<EnhancementRecord>> {
        Ok(self.newest(|r| {
            r.submission_id == submission_id
                && r.kind == kind
                && r.request_fingerprint == request_fingerprint
        }))
    }

    async fn find_record(&self, id: Uuid, owner: Uuid) -> Result<Option<EnhancementRecord>> {
        let record = self.newest(|r| r.id == id);
        Ok(record.filter(|r| {
            self.snapshot(r.submission_id)
                .is_some_and(|s| s.owner_id == owner)
        }))
    }

    async fn list_records(&self, submission_id: Uuid) -> Result<Vec<EnhancementRecord>> {
        let mut records: Vec<EnhancementRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(records)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Blob store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(&self, bytes: Bytes, folder: &str, extension: &str) -> Result<String> {
        let key = object_key(folder, extension);
        self.blobs.lock().unwrap().insert(key.clone(), bytes);
        Ok(key)
    }

    async fn read(&self, locator: &str) -> Result<Bytes> {
        self.blobs
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| anyhow!("no blob stored at {locator}"))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Parser and generator
// ────────────────────────────────────────────────────────────────────────────

pub struct ScriptedParser {
    result: Option<Value>,
    calls: AtomicUsize,
}

impl ScriptedParser {
    pub fn succeeding(result: Value) -> Self {
        Self {
            result: Some(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructuredParser for ScriptedParser {
    async fn parse(&self, _text: &str) -> Result<Value, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().ok_or(ParseError::Api {
            status: 503,
            message: "scripted failure".to_string(),
        })
    }

    async fn healthy(&self) -> bool {
        self.result.is_some()
    }
}

/// Generator fake that replays canned responses in order.
#[derive(Clone)]
pub struct ScriptedGenerator {
    available: bool,
    fail: bool,
    responses: Arc<Mutex<VecDeque<String>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn available<'a, I>(responses: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            available: true,
            fail: false,
            responses: Arc::new(Mutex::new(
                responses.into_iter().map(str::to_string).collect(),
            )),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configured, but every call errors.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::available([])
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::available([])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn available(&self) -> bool {
        self.available
    }

    async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        if !self.available {
            return Err(GenerationError::Unavailable);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GenerationError::Api {
                status: 500,
                message: "scripted failure".to_string(),
            });
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(GenerationError::EmptyContent)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Harness
// ────────────────────────────────────────────────────────────────────────────

/// A fully wired pipeline over in-memory collaborators.
pub struct Harness {
    pub pipeline: Arc<EnhancementPipeline>,
    pub repository: Arc<InMemoryRepository>,
    pub cache: ResponseCache,
    pub quota: QuotaTracker,
    parser: Arc<ScriptedParser>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn state(&self) -> AppState {
        AppState {
            pipeline: self.pipeline.clone(),
            cache: self.cache.clone(),
            quota: self.quota.clone(),
            parser: self.parser.clone(),
        }
    }
}

pub struct HarnessBuilder {
    generator: ScriptedGenerator,
    store: Option<Arc<MemoryStore>>,
    limits: QuotaLimits,
    cache_ttl: Duration,
    settings: PipelineSettings,
    parsed: Value,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            generator: ScriptedGenerator::unavailable(),
            store: None,
            limits: QuotaLimits::default(),
            cache_ttl: crate::cache::DEFAULT_TTL,
            settings: PipelineSettings::default(),
            parsed: json!({}),
        }
    }
}

impl HarnessBuilder {
    pub fn generator(mut self, generator: ScriptedGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Enables both cache and quota over `store`.
    pub fn shared_store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn limits(mut self, limits: QuotaLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.settings.reuse_policy = policy;
        self
    }

    pub fn max_upload_bytes(mut self, max: usize) -> Self {
        self.settings.max_upload_bytes = max;
        self
    }

    /// What the parse stage stores for every submission.
    pub fn parsed(mut self, parsed: Value) -> Self {
        self.parsed = parsed;
        self
    }

    pub fn build(self) -> Harness {
        let repository = Arc::new(InMemoryRepository::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let parser = Arc::new(ScriptedParser::succeeding(self.parsed));

        let (cache, quota) = match self.store {
            Some(store) => {
                let shared: Arc<dyn SharedStore> = store;
                (
                    ResponseCache::shared(shared.clone(), self.cache_ttl),
                    QuotaTracker::shared(shared, self.limits),
                )
            }
            None => (ResponseCache::disabled(), QuotaTracker::disabled(self.limits)),
        };

        let stages = StageRunner::new(
            repository.clone(),
            blobs.clone(),
            Arc::new(DocumentTextExtractor),
            parser.clone(),
            StagePool::new(4),
        );
        let pipeline = EnhancementPipeline::new(
            repository.clone(),
            blobs,
            stages,
            Arc::new(self.generator),
            cache.clone(),
            quota.clone(),
            self.settings,
        );

        Harness {
            pipeline: Arc::new(pipeline),
            repository,
            cache,
            quota,
            parser,
        }
    }
}
