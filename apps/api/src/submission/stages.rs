//! Background stages: text extraction, then structured parsing.
//!
//! Both run as tokio tasks gated by one shared semaphore, so at most
//! `STAGE_CONCURRENCY` stages execute at once. Stages are neither retried nor
//! cancelled; their outcome is visible only through the submission's stage and
//! error flag.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::submission::{DocumentKind, SubmissionStage};
use crate::repository::Repository;
use crate::submission::blob::BlobStore;
use crate::submission::extraction::{non_empty, ExtractionError, TextExtractor};
use crate::submission::parser::StructuredParser;

/// Bounded pool for background stage tasks.
#[derive(Clone)]
pub struct StagePool {
    permits: Arc<Semaphore>,
}

impl StagePool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Spawns `task`; it starts running once a permit is free.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                error!("Stage pool closed, dropping background task");
                return;
            };
            task.await;
        });
    }
}

/// Where extraction reads its input from.
#[derive(Debug, Clone)]
pub enum ExtractionSource {
    Blob { locator: String, kind: DocumentKind },
    Inline(String),
}

#[derive(Clone)]
pub struct StageRunner {
    repository: Arc<dyn Repository>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
    parser: Arc<dyn StructuredParser>,
    pool: StagePool,
}

impl StageRunner {
    pub fn new(
        repository: Arc<dyn Repository>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        parser: Arc<dyn StructuredParser>,
        pool: StagePool,
    ) -> Self {
        Self {
            repository,
            blobs,
            extractor,
            parser,
            pool,
        }
    }

    pub fn schedule_extraction(&self, submission_id: Uuid, source: ExtractionSource) {
        let runner = self.clone();
        self.pool
            .spawn(async move { runner.run_extraction(submission_id, source).await });
    }

    pub fn schedule_parse(&self, submission_id: Uuid, text: String) {
        let runner = self.clone();
        self.pool
            .spawn(async move { runner.run_parse(submission_id, text).await });
    }

    /// `Ingested → ExtractionPending → ExtractionDone | ExtractionFailed`.
    /// Success schedules the parse stage.
    pub async fn run_extraction(&self, submission_id: Uuid, source: ExtractionSource) {
        if let Err(e) = self
            .repository
            .mark_stage(submission_id, SubmissionStage::ExtractionPending)
            .await
        {
            error!("Cannot start extraction for submission {submission_id}: {e:#}");
            return;
        }

        let extracted = match source {
            ExtractionSource::Inline(text) => non_empty(text),
            ExtractionSource::Blob { locator, kind } => match self.blobs.read(&locator).await {
                Ok(bytes) => self.extractor.extract_text(bytes, kind).await,
                Err(e) => Err(ExtractionError::Source(format!("{e:#}"))),
            },
        };

        match extracted {
            Ok(text) => {
                if let Err(e) = self.repository.store_raw_text(submission_id, &text).await {
                    error!("Failed to store extracted text for submission {submission_id}: {e:#}");
                    return;
                }
                info!(
                    "Extracted {} chars for submission {submission_id}",
                    text.chars().count()
                );
                self.schedule_parse(submission_id, text);
            }
            Err(e) => {
                warn!("Text extraction failed for submission {submission_id}: {e}");
                self.fail(submission_id, SubmissionStage::ExtractionFailed)
                    .await;
            }
        }
    }

    /// `ExtractionDone → ParsePending → ParseDone | ParseFailed`. Raw text is never touched.
    pub async fn run_parse(&self, submission_id: Uuid, text: String) {
        if let Err(e) = self
            .repository
            .mark_stage(submission_id, SubmissionStage::ParsePending)
            .await
        {
            error!("Cannot start parse for submission {submission_id}: {e:#}");
            return;
        }

        match self.parser.parse(&text).await {
            Ok(parsed) => match self.repository.store_parsed(submission_id, &parsed).await {
                Ok(()) => info!("Parsed submission {submission_id}"),
                Err(e) => error!("Failed to store parse result for submission {submission_id}: {e:#}"),
            },
            Err(e) => {
                warn!("Structured parse failed for submission {submission_id}: {e}");
                self.fail(submission_id, SubmissionStage::ParseFailed).await;
            }
        }
    }

    async fn fail(&self, submission_id: Uuid, stage: SubmissionStage) {
        if let Err(e) = self.repository.mark_stage(submission_id, stage).await {
            error!(
                "Failed to mark submission {submission_id} as {}: {e:#}",
                stage.as_str()
            );
        }
    }
}
