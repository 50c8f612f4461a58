//! Merge request records and history rows.

use super::{Store, from_db_count, from_db_id, from_millis, to_db_id, to_millis};
use crate::error::{Error, Result};
use crate::types::{
    HistoryAction, MergeHistoryEntry, MergeRequestRecord, MergeRequestSnapshot, MrStatus,
};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

const RECORD_COLUMNS: &str = "project, iid, title, source_branch, target_branch, status, \
     rejection_count, priority, recognized_at, merged_at";

#[derive(FromRow)]
struct RecordRow {
    project: String,
    iid: i64,
    title: String,
    source_branch: String,
    target_branch: String,
    status: String,
    rejection_count: i64,
    priority: i64,
    recognized_at: i64,
    merged_at: Option<i64>,
}

impl TryFrom<RecordRow> for MergeRequestRecord {
    type Error = Error;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(Self {
            project: row.project,
            iid: from_db_id(row.iid)?,
            title: row.title,
            source_branch: row.source_branch,
            target_branch: row.target_branch,
            status: row.status.parse()?,
            rejection_count: from_db_count(row.rejection_count)?,
            priority: row.priority,
            recognized_at: from_millis(row.recognized_at)?,
            merged_at: row.merged_at.map(from_millis).transpose()?,
        })
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: i64,
    project: String,
    iid: i64,
    action: String,
    details: String,
    batch_id: Option<i64>,
    created_at: i64,
}

impl TryFrom<HistoryRow> for MergeHistoryEntry {
    type Error = Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            project: row.project,
            iid: from_db_id(row.iid)?,
            action: row.action.parse()?,
            details: serde_json::from_str(&row.details)
                .map_err(|e| Error::Invariant(format!("corrupt history details: {e}")))?,
            batch_id: row.batch_id,
            created_at: from_millis(row.created_at)?,
        })
    }
}

impl Store {
    /// Get-or-create the record for a snapshot.
    ///
    /// New records start as `recognized`. Existing records get their title
    /// and branch names refreshed; lifecycle fields are left alone. The
    /// returned flag is true when the record was created by this call.
    pub async fn observe(
        &self,
        project: &str,
        snapshot: &MergeRequestSnapshot,
    ) -> Result<(MergeRequestRecord, bool)> {
        let now = to_millis(Utc::now());
        let iid = to_db_id(snapshot.iid)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO merge_requests
                (project, iid, title, source_branch, target_branch, status, recognized_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'recognized', ?, ?)
            ON CONFLICT (project, iid) DO NOTHING
            ",
        )
        .bind(project)
        .bind(iid)
        .bind(&snapshot.title)
        .bind(&snapshot.source_branch)
        .bind(&snapshot.target_branch)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            sqlx::query(
                r"
                UPDATE merge_requests
                SET title = ?, source_branch = ?, target_branch = ?, updated_at = ?
                WHERE project = ? AND iid = ?
                ",
            )
            .bind(&snapshot.title)
            .bind(&snapshot.source_branch)
            .bind(&snapshot.target_branch)
            .bind(now)
            .bind(project)
            .bind(iid)
            .execute(&self.pool)
            .await?;
        }

        let record = self
            .get(project, snapshot.iid)
            .await?
            .ok_or_else(|| Error::Invariant(format!("record !{} vanished", snapshot.iid)))?;
        Ok((record, inserted))
    }

    /// Fetch one record
    pub async fn get(&self, project: &str, iid: u64) -> Result<Option<MergeRequestRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM merge_requests WHERE project = ? AND iid = ?"
        ))
        .bind(project)
        .bind(to_db_id(iid)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    /// Persist a lifecycle transition
    pub async fn update_state(
        &self,
        project: &str,
        iid: u64,
        status: MrStatus,
        rejection_count: u32,
    ) -> Result<()> {
        if status == MrStatus::Ready && rejection_count != 0 {
            return Err(Error::Invariant(format!(
                "!{iid} entering ready with rejection count {rejection_count}"
            )));
        }

        let updated = sqlx::query(
            r"
            UPDATE merge_requests
            SET status = ?, rejection_count = ?, updated_at = ?
            WHERE project = ? AND iid = ?
            ",
        )
        .bind(status.as_str())
        .bind(i64::from(rejection_count))
        .bind(to_millis(Utc::now()))
        .bind(project)
        .bind(to_db_id(iid)?)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::NotFound(format!("MR !{iid} in project '{project}'")));
        }
        Ok(())
    }

    /// Mark a record merged at `at`
    pub async fn mark_merged(&self, project: &str, iid: u64, at: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query(
            r"
            UPDATE merge_requests
            SET status = 'merged', merged_at = ?, updated_at = ?
            WHERE project = ? AND iid = ?
            ",
        )
        .bind(to_millis(at))
        .bind(to_millis(Utc::now()))
        .bind(project)
        .bind(to_db_id(iid)?)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::NotFound(format!("MR !{iid} in project '{project}'")));
        }
        Ok(())
    }

    /// Change an MR's priority and log it
    pub async fn set_priority(&self, project: &str, iid: u64, priority: i64) -> Result<()> {
        let previous = self
            .get(project, iid)
            .await?
            .ok_or_else(|| Error::NotFound(format!("MR !{iid} in project '{project}'")))?
            .priority;

        sqlx::query(
            "UPDATE merge_requests SET priority = ?, updated_at = ? WHERE project = ? AND iid = ?",
        )
        .bind(priority)
        .bind(to_millis(Utc::now()))
        .bind(project)
        .bind(to_db_id(iid)?)
        .execute(&self.pool)
        .await?;

        self.record_history(
            project,
            iid,
            HistoryAction::PrioritySet,
            serde_json::json!({ "previous": previous, "priority": priority }),
            None,
        )
        .await
    }

    /// All `ready` records of a project
    pub async fn ready_records(&self, project: &str) -> Result<Vec<MergeRequestRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM merge_requests WHERE project = ? AND status = 'ready' ORDER BY iid"
        ))
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Records of one project, or of every project when `project` is `None`
    pub async fn list_records(&self, project: Option<&str>) -> Result<Vec<MergeRequestRecord>> {
        let rows: Vec<RecordRow> = match project {
            Some(project) => {
                sqlx::query_as(&format!(
                    "SELECT {RECORD_COLUMNS} FROM merge_requests WHERE project = ? ORDER BY iid"
                ))
                .bind(project)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {RECORD_COLUMNS} FROM merge_requests ORDER BY project, iid"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Append an audit row
    pub async fn record_history(
        &self,
        project: &str,
        iid: u64,
        action: HistoryAction,
        details: serde_json::Value,
        batch_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO merge_history (project, iid, action, details, batch_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(project)
        .bind(to_db_id(iid)?)
        .bind(action.as_str())
        .bind(details.to_string())
        .bind(batch_id)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Audit rows for one MR, oldest first
    pub async fn history_for(&self, project: &str, iid: u64) -> Result<Vec<MergeHistoryEntry>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r"
            SELECT id, project, iid, action, details, batch_id, created_at
            FROM merge_history
            WHERE project = ? AND iid = ?
            ORDER BY id
            ",
        )
        .bind(project)
        .bind(to_db_id(iid)?)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
