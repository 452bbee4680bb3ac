//! Persistence for submissions and enhancement records.
//!
//! Enhancement records are append-only: a transform INSERTs a new version and
//! never UPDATEs an existing row. Submissions are only mutated by the two
//! background stages, and every stage change is guarded by its predecessor.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::enhancement::{
    EnhancementKind, EnhancementRecord, EnhancementRecordRow, NewEnhancementRecord,
};
use crate::models::submission::{NewSubmission, Submission, SubmissionRow, SubmissionStage};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn insert_submission(&self, new: NewSubmission) -> Result<Submission>;

    /// The submission, if it exists and belongs to `owner`.
    async fn find_submission(&self, id: Uuid, owner: Uuid) -> Result<Option<Submission>>;

    async fn list_submissions(&self, owner: Uuid) -> Result<Vec<Submission>>;

    /// Moves `id` into `stage`. Fails unless the submission is currently in the
    /// stage's predecessor. Failure stages also set the error flag.
    async fn mark_stage(&self, id: Uuid, stage: SubmissionStage) -> Result<()>;

    /// Completes extraction: stores the text, clears the error flag, and moves
    /// `ExtractionPending → ExtractionDone`.
    async fn store_raw_text(&self, id: Uuid, text: &str) -> Result<()>;

    /// Completes parsing: stores the structured value and moves `ParsePending → ParseDone`.
    async fn store_parsed(&self, id: Uuid, parsed: &Value) -> Result<()>;

    /// Appends a record as the submission's next version.
    async fn insert_record(&self, new: NewEnhancementRecord) -> Result<EnhancementRecord>;

    async fn latest_record(
        &self,
        submission_id: Uuid,
        kind: EnhancementKind,
    ) -> Result<Option<EnhancementRecord>>;

    async fn latest_matching_record(
        &self,
        submission_id: Uuid,
        kind: EnhancementKind,
        request_fingerprint: &str,
    ) -> Result<Option<EnhancementRecord>>;

    /// The record, if it exists and its submission belongs to `owner`.
    async fn find_record(&self, id: Uuid, owner: Uuid) -> Result<Option<EnhancementRecord>>;

    /// All records of a submission, newest first.
    async fn list_records(&self, submission_id: Uuid) -> Result<Vec<EnhancementRecord>>;
}

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn insert_submission(&self, new: NewSubmission) -> Result<Submission> {
        let row: SubmissionRow = sqlx::query_as(
            r#"
            INSERT INTO submissions
                (id, owner_id, source_locator, document_kind, raw_text, stage)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.owner_id)
        .bind(&new.source_locator)
        .bind(new.document_kind.as_str())
        .bind(&new.raw_text)
        .bind(SubmissionStage::Ingested.as_str())
        .fetch_one(&self.pool)
        .await?;

        info!("Inserted submission {} for user {}", row.id, row.owner_id);
        row.try_into()
    }

    async fn find_submission(&self, id: Uuid, owner: Uuid) -> Result<Option<Submission>> {
        let row: Option<SubmissionRow> =
            sqlx::query_as("SELECT * FROM submissions WHERE id = $1 AND owner_id = $2")
                .bind(id)
                .bind(owner)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Submission::try_from).transpose()
    }

    async fn list_submissions(&self, owner: Uuid) -> Result<Vec<Submission>> {
        let rows: Vec<SubmissionRow> = sqlx::query_as(
            "SELECT * FROM submissions WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Submission::try_from).collect()
    }

    async fn mark_stage(&self, id: Uuid, stage: SubmissionStage) -> Result<()> {
        let Some(from) = stage.predecessor() else {
            bail!("stage '{}' cannot be entered after ingest", stage.as_str());
        };
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET stage = $1, parse_error = parse_error OR $2
            WHERE id = $3 AND stage = $4
            "#,
        )
        .bind(stage.as_str())
        .bind(stage.is_failure())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!(
                "submission {id} is not in stage '{}', cannot move to '{}'",
                from.as_str(),
                stage.as_str()
            );
        }
        Ok(())
    }

    async fn store_raw_text(&self, id: Uuid, text: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET raw_text = $1, parse_error = FALSE, stage = $2
            WHERE id = $3 AND stage = $4
            "#,
        )
        .bind(text)
        .bind(SubmissionStage::ExtractionDone.as_str())
        .bind(id)
        .bind(SubmissionStage::ExtractionPending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("submission {id} is not awaiting extraction");
        }
        Ok(())
    }

    async fn store_parsed(&self, id: Uuid, parsed: &Value) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET parsed = $1, stage = $2
            WHERE id = $3 AND stage = $4
            "#,
        )
        .bind(parsed)
        .bind(SubmissionStage::ParseDone.as_str())
        .bind(id)
        .bind(SubmissionStage::ParsePending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("submission {id} is not awaiting parse");
        }
        Ok(())
    }

    async fn insert_record(&self, new: NewEnhancementRecord) -> Result<EnhancementRecord> {
        let suggestions = new
            .suggestions
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        // Row lock on the parent submission serialises version allocation.
        // Without it two READ COMMITTED transactions can read the same MAX(version).
        let mut tx = self.pool.begin().await?;
        let parent: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM submissions WHERE id = $1 FOR UPDATE")
                .bind(new.submission_id)
                .fetch_optional(&mut *tx)
                .await?;
        if parent.is_none() {
            bail!("submission {} does not exist", new.submission_id);
        }

        let row: EnhancementRecordRow = sqlx::query_as(
            r#"
            INSERT INTO enhancement_records
                (id, submission_id, version, kind, language, text,
                 suggestions, origin, request_fingerprint)
            SELECT $1, $2, COALESCE(MAX(version), 0) + 1, $3, $4, $5, $6, $7, $8
            FROM enhancement_records
            WHERE submission_id = $2
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.submission_id)
        .bind(new.kind.as_str())
        .bind(new.language.code())
        .bind(&new.text)
        .bind(suggestions)
        .bind(new.origin.as_str())
        .bind(&new.request_fingerprint)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            "Inserted {} record version {} for submission {}",
            row.kind, row.version, row.submission_id
        );
        row.try_into()
    }

    async fn latest_record(
        &self,
        submission_id: Uuid,
        kind: EnhancementKind,
    ) -> Result<Option<EnhancementRecord>> {
        let row: Option<EnhancementRecordRow> = sqlx::query_as(
            r#"
            SELECT * FROM enhancement_records
            WHERE submission_id = $1 AND kind = $2
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(submission_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(EnhancementRecord::try_from).transpose()
    }

    async fn latest_matching_record(
        &self,
        submission_id: Uuid,
        kind: EnhancementKind,
        request_fingerprint: &str,
    ) -> Result<Option<EnhancementRecord>> {
        let row: Option<EnhancementRecordRow> = sqlx::query_as(
            r#"
            SELECT * FROM enhancement_records
            WHERE submission_id = $1 AND kind = $2 AND request_fingerprint = $3
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(submission_id)
        .bind(kind.as_str())
        .bind(request_fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        row.map(EnhancementRecord::try_from).transpose()
    }

    async fn find_record(&self, id: Uuid, owner: Uuid) -> Result<Option<EnhancementRecord>> {
        let row: Option<EnhancementRecordRow> = sqlx::query_as(
            r#"
            SELECT r.* FROM enhancement_records r
            JOIN submissions s ON s.id = r.submission_id
            WHERE r.id = $1 AND s.owner_id = $2
            "#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        row.map(EnhancementRecord::try_from).transpose()
    }

    async fn list_records(&self, submission_id: Uuid) -> Result<Vec<EnhancementRecord>> {
        let rows: Vec<EnhancementRecordRow> = sqlx::query_as(
            "SELECT * FROM enhancement_records WHERE submission_id = $1 ORDER BY version DESC",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EnhancementRecord::try_from).collect()
    }
}
