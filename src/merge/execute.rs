//! Merge execution - effectful operations
//!
//! Drives the rebase, pipeline wait and merge protocol against the provider
//! for a [`WorkUnit`] chosen by the pure planning functions.
//!
//! Provider failures never escape as errors: they end the run with an
//! outcome, and the MR stays `ready` so the next reconciliation cycle
//! re-evaluates it. Only store failures are returned as `Err`, after any
//! batch resources have been released.

use crate::annotate::{self, Annotation, AnnotationSink, MergeMode};
use crate::config::ProjectSettings;
use crate::error::Result;
use crate::merge::pipeline::{PipelineOutcome, wait_for_pipeline};
use crate::merge::plan::WorkUnit;
use crate::platform::MergeProvider;
use crate::store::Store;
use crate::types::{
    BatchOperation, BatchStatus, CreatedMr, HistoryAction, MergeOptions, MergeRequestRecord,
};
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// How a single-MR run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleOutcome {
    /// MR merged and recorded
    Merged,
    /// Provider could not rebase the MR
    RebaseFailed(String),
    /// Pipeline failed or timed out
    PipelineFailed(PipelineOutcome),
    /// Merge call failed or was refused
    MergeFailed(String),
    /// Shutdown interrupted the run before merging
    Cancelled,
}

/// How a batch run ended
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Final persisted batch
    pub batch: BatchOperation,
    /// Members merged, in order
    pub merged: Vec<u64>,
    /// Members that failed to rebase or merge
    pub failed: Vec<u64>,
}

/// Result of executing one work unit
#[derive(Debug, Clone)]
pub enum ExecutionReport {
    /// Single-MR path
    Single {
        /// MR iid
        iid: u64,
        /// How it ended
        outcome: SingleOutcome,
    },
    /// Batch path
    Batch(BatchReport),
}

/// How the part of a batch run after aggregate MR creation ended
enum BatchEnd {
    /// Aggregate pipeline failed, timed out or was cancelled
    PipelineNotPassed(PipelineOutcome),
    /// Shutdown stopped the member loop
    Interrupted,
    /// Every member was attempted
    Merged,
}

/// Executes merge work for one project
pub struct MergeExecutor<'a> {
    provider: &'a dyn MergeProvider,
    sink: &'a dyn AnnotationSink,
    store: &'a Store,
    settings: &'a ProjectSettings,
    cancel: &'a CancellationToken,
}

impl<'a> MergeExecutor<'a> {
    /// Create an executor borrowing the loop's collaborators
    pub const fn new(
        provider: &'a dyn MergeProvider,
        sink: &'a dyn AnnotationSink,
        store: &'a Store,
        settings: &'a ProjectSettings,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            provider,
            sink,
            store,
            settings,
            cancel,
        }
    }

    /// Execute a work unit
    pub async fn execute(&self, unit: &WorkUnit) -> Result<ExecutionReport> {
        match unit {
            WorkUnit::Single(mr) => Ok(ExecutionReport::Single {
                iid: mr.iid,
                outcome: self.merge_single(mr).await?,
            }),
            WorkUnit::Batch {
                target_branch,
                members,
            } => Ok(ExecutionReport::Batch(
                self.merge_batch(target_branch, members).await?,
            )),
        }
    }

    /// Rebase, wait for the pipeline, merge.
    #[instrument(skip_all, fields(project = %self.settings.project, mr_iid = mr.iid))]
    pub async fn merge_single(&self, mr: &MergeRequestRecord) -> Result<SingleOutcome> {
        let iid = mr.iid;
        if self.cancel.is_cancelled() {
            return Ok(SingleOutcome::Cancelled);
        }

        info!("rebasing");
        if let Err(e) = self.provider.rebase(iid).await {
            let cause = e.to_string();
            self.record_failure(iid, "rebase", &cause, None).await?;
            annotate::emit(self.sink, Annotation::RebaseFailed { iid, cause: cause.clone() }).await;
            return Ok(SingleOutcome::RebaseFailed(cause));
        }

        let head_sha = match self.provider.fetch_mr(iid).await {
            Ok(snapshot) => snapshot.sha,
            Err(e) => {
                warn!(error = %e, "could not refresh head commit after rebase");
                None
            }
        };

        info!(sha = ?head_sha, "waiting for pipeline");
        let outcome = wait_for_pipeline(
            self.provider,
            iid,
            head_sha.as_deref(),
            self.settings.poll_interval,
            self.settings.pipeline_timeout,
            self.cancel,
        )
        .await;

        match outcome {
            PipelineOutcome::Success => {}
            PipelineOutcome::Cancelled => {
                self.record_failure(iid, "pipeline", "cancelled", None).await?;
                return Ok(SingleOutcome::Cancelled);
            }
            failed => {
                let cause = failed.to_string();
                self.record_failure(iid, "pipeline", &cause, None).await?;
                annotate::emit(self.sink, Annotation::ExecutionFailed { iid, cause }).await;
                return Ok(SingleOutcome::PipelineFailed(failed));
            }
        }

        if self.cancel.is_cancelled() {
            self.record_failure(iid, "merge", "cancelled", None).await?;
            return Ok(SingleOutcome::Cancelled);
        }

        match self.merge_member(iid, head_sha, MergeMode::Single, None).await? {
            Ok(()) => Ok(SingleOutcome::Merged),
            Err(cause) => Ok(SingleOutcome::MergeFailed(cause)),
        }
    }

    /// Validate members together on an aggregate MR, then merge each one.
    ///
    /// Once the integration branch exists it is always cleaned up, even when
    /// a store failure aborts the run.
    #[instrument(skip_all, fields(project = %self.settings.project, target_branch = %target_branch))]
    pub async fn merge_batch(
        &self,
        target_branch: &str,
        members: &[MergeRequestRecord],
    ) -> Result<BatchReport> {
        let iids: Vec<u64> = members.iter().map(|m| m.iid).collect();
        let batch_branch = batch_branch_name();
        let mut batch = self
            .store
            .insert_batch(&self.settings.project, target_branch, &batch_branch, &iids)
            .await?;
        info!(batch_id = batch.id, members = ?iids, branch = %batch_branch, "starting batch");

        let mut report = BatchReport {
            batch: batch.clone(),
            merged: Vec::new(),
            failed: Vec::new(),
        };

        if let Err(e) = self.provider.create_branch(&batch_branch, target_branch).await {
            // The branch may exist even though the call failed.
            warn!(error = %e, "failed to create integration branch");
            self.cleanup(None, &batch_branch).await;
            self.finish_batch(&mut batch, BatchStatus::Failed, Some(e.to_string())).await?;
            report.batch = batch;
            return Ok(report);
        }

        let title = batch_title(&iids);
        let description = batch_description(members);
        let aggregate = match self
            .provider
            .create_aggregate_mr(&batch_branch, target_branch, &title, &description)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                warn!(error = %e, "failed to create aggregate MR");
                self.cleanup(None, &batch_branch).await;
                self.finish_batch(&mut batch, BatchStatus::Failed, Some(e.to_string())).await?;
                report.batch = batch;
                return Ok(report);
            }
        };

        let driven = self
            .drive_batch(&mut batch, &aggregate, &iids, &mut report)
            .await;
        self.cleanup(Some(aggregate.iid), &batch_branch).await;

        batch.merged_count = u32::try_from(report.merged.len()).unwrap_or(u32::MAX);
        batch.failed_count = u32::try_from(report.failed.len()).unwrap_or(u32::MAX);
        let (status, error) = match driven {
            Ok(BatchEnd::PipelineNotPassed(outcome)) => {
                (BatchStatus::Failed, Some(outcome.to_string()))
            }
            Ok(BatchEnd::Interrupted) => (BatchStatus::Failed, Some("cancelled".to_string())),
            Ok(BatchEnd::Merged) => (
                BatchStatus::Completed,
                (!report.failed.is_empty()).then(|| {
                    format!("{} of {} members failed", report.failed.len(), iids.len())
                }),
            ),
            Err(e) => {
                error!(batch_id = batch.id, error = %e, "batch aborted");
                if let Err(finish) = self
                    .finish_batch(&mut batch, BatchStatus::Failed, Some(e.to_string()))
                    .await
                {
                    warn!(
                        batch_id = batch.id,
                        error = %finish,
                        "could not mark aborted batch failed"
                    );
                }
                return Err(e);
            }
        };
        self.finish_batch(&mut batch, status, error).await?;

        info!(
            batch_id = batch.id,
            merged = report.merged.len(),
            failed = report.failed.len(),
            status = %batch.status,
            "batch finished"
        );
        report.batch = batch;
        Ok(report)
    }

    /// Label the aggregate MR, wait for its pipeline and merge the members.
    async fn drive_batch(
        &self,
        batch: &mut BatchOperation,
        aggregate: &CreatedMr,
        iids: &[u64],
        report: &mut BatchReport,
    ) -> Result<BatchEnd> {
        batch.batch_mr_iid = Some(aggregate.iid);
        batch.advance(BatchStatus::PipelineRunning);
        self.store.update_batch(batch).await?;

        if let Err(e) = self
            .provider
            .add_labels(aggregate.iid, std::slice::from_ref(&self.settings.labels.batch_mr))
            .await
        {
            warn!(batch_mr_iid = aggregate.iid, error = %e, "failed to label aggregate MR");
        }
        for &iid in iids {
            annotate::emit(
                self.sink,
                Annotation::BatchInProgress {
                    iid,
                    batch_iid: aggregate.iid,
                },
            )
            .await;
        }

        let outcome = wait_for_pipeline(
            self.provider,
            aggregate.iid,
            aggregate.sha.as_deref(),
            self.settings.poll_interval,
            self.settings.pipeline_timeout,
            self.cancel,
        )
        .await;

        if outcome != PipelineOutcome::Success {
            info!(batch_id = batch.id, %outcome, "batch pipeline did not pass");
            if outcome != PipelineOutcome::Cancelled {
                batch.advance(BatchStatus::PipelineFailed);
                self.store.update_batch(batch).await?;
            }
            return Ok(BatchEnd::PipelineNotPassed(outcome));
        }

        batch.advance(BatchStatus::PipelineSuccess);
        self.store.update_batch(batch).await?;
        batch.advance(BatchStatus::Merging);
        self.store.update_batch(batch).await?;

        for &iid in iids {
            if self.cancel.is_cancelled() {
                return Ok(BatchEnd::Interrupted);
            }

            if let Err(e) = self.provider.rebase(iid).await {
                let cause = e.to_string();
                warn!(mr_iid = iid, error = %cause, "batch member rebase failed");
                report.failed.push(iid);
                self.record_failure(iid, "rebase", &cause, Some(batch.id)).await?;
                annotate::emit(self.sink, Annotation::RebaseFailed { iid, cause }).await;
                continue;
            }

            match self.merge_member(iid, None, MergeMode::Batch, Some(batch.id)).await? {
                Ok(()) => report.merged.push(iid),
                Err(_) => report.failed.push(iid),
            }
        }
        Ok(BatchEnd::Merged)
    }

    /// Merge one MR and record the result.
    ///
    /// The inner `Err` carries the cause of a failed merge; the outer one is
    /// reserved for store failures.
    async fn merge_member(
        &self,
        iid: u64,
        sha: Option<String>,
        mode: MergeMode,
        batch_id: Option<i64>,
    ) -> Result<std::result::Result<(), String>> {
        let options = MergeOptions {
            remove_source_branch: true,
            sha,
            commit_message: None,
        };

        let cause = match self.provider.merge(iid, &options).await {
            Ok(result) if result.merged => {
                self.finish_merged(iid, result.sha, mode, batch_id).await?;
                return Ok(Ok(()));
            }
            Ok(result) => result
                .message
                .unwrap_or_else(|| "merge was not accepted".to_string()),
            Err(e) => e.to_string(),
        };

        warn!(mr_iid = iid, error = %cause, "merge failed");
        self.record_failure(iid, "merge", &cause, batch_id).await?;
        annotate::emit(
            self.sink,
            Annotation::ExecutionFailed {
                iid,
                cause: cause.clone(),
            },
        )
        .await;
        Ok(Err(cause))
    }

    async fn finish_merged(
        &self,
        iid: u64,
        sha: Option<String>,
        mode: MergeMode,
        batch_id: Option<i64>,
    ) -> Result<()> {
        let project = &self.settings.project;
        info!(mr_iid = iid, sha = ?sha, "merged");

        if let Err(e) = self
            .provider
            .remove_labels(iid, &self.settings.labels.transient())
            .await
        {
            warn!(mr_iid = iid, error = %e, "failed to clear labels after merge");
        }

        self.store.mark_merged(project, iid, Utc::now()).await?;
        let mode_tag = match mode {
            MergeMode::Single => "single",
            MergeMode::Batch => "batch",
        };
        self.store
            .record_history(
                project,
                iid,
                HistoryAction::Merged,
                json!({ "mode": mode_tag, "sha": sha }),
                batch_id,
            )
            .await?;

        annotate::emit(self.sink, Annotation::MergeSucceeded { iid, mode }).await;
        Ok(())
    }

    async fn record_failure(
        &self,
        iid: u64,
        stage: &str,
        cause: &str,
        batch_id: Option<i64>,
    ) -> Result<()> {
        self.store
            .record_history(
                &self.settings.project,
                iid,
                HistoryAction::Failed,
                json!({ "stage": stage, "error": cause }),
                batch_id,
            )
            .await
    }

    async fn finish_batch(
        &self,
        batch: &mut BatchOperation,
        status: BatchStatus,
        error: Option<String>,
    ) -> Result<()> {
        batch.error_message = error;
        batch.advance(status);
        self.store.update_batch(batch).await
    }

    /// Close the aggregate MR and delete the integration branch.
    ///
    /// Runs regardless of cancellation; failures are logged.
    async fn cleanup(&self, aggregate_iid: Option<u64>, batch_branch: &str) {
        if let Some(iid) = aggregate_iid {
            match self.provider.close_mr(iid).await {
                Ok(()) => debug!(batch_mr_iid = iid, "closed aggregate MR"),
                Err(e) => warn!(batch_mr_iid = iid, error = %e, "failed to close aggregate MR"),
            }
        }
        match self.provider.delete_branch(batch_branch).await {
            Ok(()) => debug!(branch = batch_branch, "deleted integration branch"),
            Err(e) => warn!(branch = batch_branch, error = %e, "failed to delete integration branch"),
        }
    }
}

/// Fresh integration branch name
fn batch_branch_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "merge-assist/batch-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &id[..8]
    )
}

/// Aggregate MR title, e.g. `[Merge Assist Batch] !1, !2`
pub fn batch_title(iids: &[u64]) -> String {
    let refs: Vec<String> = iids.iter().map(|iid| format!("!{iid}")).collect();
    format!("[Merge Assist Batch] {}", refs.join(", "))
}

fn batch_description(members: &[MergeRequestRecord]) -> String {
    let mut lines = vec![
        "Temporary merge request validating a batch. It is closed automatically.".to_string(),
        String::new(),
        "Members:".to_string(),
    ];
    lines.extend(members.iter().map(|m| format!("- !{} {}", m.iid, m.title)));
    lines.join("\n")
}
