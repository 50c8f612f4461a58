//! Batch operation rows.

use super::{Store, from_db_count, from_db_id, from_millis, to_db_id, to_millis};
use crate::error::{Error, Result};
use crate::types::{BatchOperation, BatchStatus};
use chrono::Utc;
use sqlx::FromRow;

#[derive(FromRow)]
struct BatchRow {
    id: i64,
    project: String,
    target_branch: String,
    batch_branch: String,
    batch_mr_iid: Option<i64>,
    members: String,
    status: String,
    error_message: Option<String>,
    merged_count: i64,
    failed_count: i64,
    started_at: i64,
    completed_at: Option<i64>,
}

impl TryFrom<BatchRow> for BatchOperation {
    type Error = Error;

    fn try_from(row: BatchRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            project: row.project,
            target_branch: row.target_branch,
            batch_branch: row.batch_branch,
            batch_mr_iid: row.batch_mr_iid.map(from_db_id).transpose()?,
            members: serde_json::from_str(&row.members)
                .map_err(|e| Error::Invariant(format!("corrupt batch members: {e}")))?,
            status: row.status.parse()?,
            error_message: row.error_message,
            merged_count: from_db_count(row.merged_count)?,
            failed_count: from_db_count(row.failed_count)?,
            started_at: from_millis(row.started_at)?,
            completed_at: row.completed_at.map(from_millis).transpose()?,
        })
    }
}

impl Store {
    /// Create a `pending` batch
    pub async fn insert_batch(
        &self,
        project: &str,
        target_branch: &str,
        batch_branch: &str,
        members: &[u64],
    ) -> Result<BatchOperation> {
        let members_json = serde_json::to_string(members)
            .map_err(|e| Error::Internal(format!("failed to encode members: {e}")))?;

        let result = sqlx::query(
            r"
            INSERT INTO batch_operations (project, target_branch, batch_branch, members, status, started_at)
            VALUES (?, ?, ?, ?, 'pending', ?)
            ",
        )
        .bind(project)
        .bind(target_branch)
        .bind(batch_branch)
        .bind(members_json)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_batch(id)
            .await?
            .ok_or_else(|| Error::Invariant(format!("batch {id} vanished after insert")))
    }

    /// Persist a batch's mutable fields.
    ///
    /// A batch already `completed` or `failed` in the database is never
    /// touched again; attempting to is an invariant violation.
    pub async fn update_batch(&self, batch: &BatchOperation) -> Result<()> {
        let updated = sqlx::query(
            r"
            UPDATE batch_operations
            SET batch_mr_iid = ?, status = ?, error_message = ?,
                merged_count = ?, failed_count = ?, completed_at = ?
            WHERE id = ? AND status NOT IN ('completed', 'failed')
            ",
        )
        .bind(batch.batch_mr_iid.map(to_db_id).transpose()?)
        .bind(batch.status.as_str())
        .bind(batch.error_message.as_deref())
        .bind(i64::from(batch.merged_count))
        .bind(i64::from(batch.failed_count))
        .bind(batch.completed_at.map(to_millis))
        .bind(batch.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return match self.get_batch(batch.id).await? {
                Some(existing) => Err(Error::Invariant(format!(
                    "batch {} is already {}",
                    batch.id, existing.status
                ))),
                None => Err(Error::NotFound(format!("batch {}", batch.id))),
            };
        }
        Ok(())
    }

    /// Fetch a batch by ID
    pub async fn get_batch(&self, id: i64) -> Result<Option<BatchOperation>> {
        let row: Option<BatchRow> = sqlx::query_as(
            r"
            SELECT id, project, target_branch, batch_branch, batch_mr_iid, members, status,
                   error_message, merged_count, failed_count, started_at, completed_at
            FROM batch_operations
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    /// Batches of a project, newest first
    pub async fn list_batches(&self, project: &str) -> Result<Vec<BatchOperation>> {
        let rows: Vec<BatchRow> = sqlx::query_as(
            r"
            SELECT id, project, target_branch, batch_branch, batch_mr_iid, members, status,
                   error_message, merged_count, failed_count, started_at, completed_at
            FROM batch_operations
            WHERE project = ?
            ORDER BY id DESC
            ",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

impl BatchOperation {
    /// Move to `status`, stamping completion for terminal states
    pub fn advance(&mut self, status: BatchStatus) {
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }
}
