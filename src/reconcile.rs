//! Reconciliation loop - one per project
//!
//! Consumes change notifications and a periodic tick. A notification runs
//! the MR through validation and the rejection policy; a tick re-validates
//! the `ready` set against fresh snapshots and executes at most one unit of
//! merge work. Everything inside one loop is awaited sequentially, so no
//! two merge runs for the same project ever overlap.

use crate::annotate::{self, Annotation, AnnotationSink};
use crate::config::ProjectSettings;
use crate::error::Result;
use crate::events::{EventSource, MrEvent};
use crate::merge::{ExecutionReport, MergeExecutor, SingleOutcome, next_unit};
use crate::platform::MergeProvider;
use crate::policy::{self, Obligation, Transition};
use crate::readiness::{self, Readiness};
use crate::store::Store;
use crate::types::{HistoryAction, MergeRequestRecord, MergeRequestSnapshot, MrState, MrStatus};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Per-project scheduler
pub struct ProjectLoop {
    settings: ProjectSettings,
    provider: Arc<dyn MergeProvider>,
    sink: Arc<dyn AnnotationSink>,
    events: Arc<dyn EventSource>,
    store: Store,
}

impl ProjectLoop {
    /// Create a loop for the project described by `settings`
    pub fn new(
        settings: ProjectSettings,
        provider: Arc<dyn MergeProvider>,
        sink: Arc<dyn AnnotationSink>,
        events: Arc<dyn EventSource>,
        store: Store,
    ) -> Self {
        Self {
            settings,
            provider,
            sink,
            events,
            store,
        }
    }

    /// Project key
    pub fn project(&self) -> &str {
        &self.settings.project
    }

    /// Run until `cancel` fires or a fatal error occurs.
    #[instrument(skip_all, fields(project = %self.settings.project))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let subscription = self.events.subscribe(&self.settings.project);
        let mut ticker = tokio::time::interval(self.settings.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("reconciliation loop started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(&cancel).await?;
                }
                event = subscription.recv() => {
                    if self.handle_event(event).await? == Some(MrStatus::Ready) {
                        self.tick(&cancel).await?;
                    }
                }
            }
        }

        info!("reconciliation loop stopped");
        Ok(())
    }

    /// Process one notification.
    ///
    /// Returns the MR's status afterwards, or `None` when the MR is not
    /// governed or could not be fetched.
    #[instrument(skip_all, fields(project = %self.settings.project, mr_iid = event.iid))]
    pub async fn handle_event(&self, event: MrEvent) -> Result<Option<MrStatus>> {
        let snapshot = match self.provider.fetch_mr(event.iid).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "failed to fetch MR, will retry next cycle");
                return Ok(None);
            }
            Err(e) => {
                error!(error = %e, "cannot fetch MR, ignoring notification");
                return Ok(None);
            }
        };

        self.reconcile(&snapshot, event.reassigned).await
    }

    /// Re-validate the ready set, then execute at most one unit of work.
    #[instrument(skip_all, fields(project = %self.settings.project))]
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<Option<ExecutionReport>> {
        let candidates = self.events.poll_ready(&self.settings.project).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut fresh = HashSet::new();
        for record in &candidates {
            match self.provider.fetch_mr(record.iid).await {
                Ok(snapshot) => {
                    if self.reconcile(&snapshot, false).await? == Some(MrStatus::Ready) {
                        fresh.insert(record.iid);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if e.is_transient() => {
                    warn!(mr_iid = record.iid, error = %e, "skipping MR this tick");
                }
                Err(e) => error!(mr_iid = record.iid, error = %e, "cannot fetch ready MR"),
            }
        }

        let ready: Vec<MergeRequestRecord> = self
            .store
            .ready_records(&self.settings.project)
            .await?
            .into_iter()
            .filter(|r| fresh.contains(&r.iid))
            .collect();

        let Some(unit) = next_unit(&ready, self.settings.batch_size) else {
            debug!("nothing ready after refresh");
            return Ok(None);
        };

        info!(members = ?unit.iids(), target_branch = unit.target_branch(), "executing merge work");
        let executor = MergeExecutor::new(
            self.provider.as_ref(),
            self.sink.as_ref(),
            &self.store,
            &self.settings,
            cancel,
        );
        let report = executor.execute(&unit).await?;

        match &report {
            ExecutionReport::Single { iid, outcome } => match outcome {
                SingleOutcome::Merged => info!(mr_iid = iid, "merged"),
                other => info!(mr_iid = iid, outcome = ?other, "single merge did not complete"),
            },
            ExecutionReport::Batch(batch) => info!(
                batch_id = batch.batch.id,
                status = %batch.batch.status,
                merged = batch.merged.len(),
                failed = batch.failed.len(),
                "batch run complete"
            ),
        }
        Ok(Some(report))
    }

    /// Apply a fresh snapshot to the MR's record
    async fn reconcile(
        &self,
        snapshot: &MergeRequestSnapshot,
        reassigned: bool,
    ) -> Result<Option<MrStatus>> {
        let project = &self.settings.project;
        let iid = snapshot.iid;

        if !self.settings.allows_branch(&snapshot.target_branch) {
            debug!(mr_iid = iid, target_branch = %snapshot.target_branch, "target branch not governed");
            return Ok(None);
        }

        let existing = self.store.get(project, iid).await?;

        match snapshot.state {
            MrState::Closed => {
                debug!(mr_iid = iid, "MR closed, ignoring");
                return Ok(existing.map(|r| r.status));
            }
            MrState::Merged => {
                return match existing {
                    Some(record) if record.status != MrStatus::Merged => {
                        info!(mr_iid = iid, "MR merged outside merge-assist");
                        self.store.mark_merged(project, iid, Utc::now()).await?;
                        self.store
                            .record_history(
                                project,
                                iid,
                                HistoryAction::Merged,
                                json!({ "external": true }),
                                None,
                            )
                            .await?;
                        Ok(Some(MrStatus::Merged))
                    }
                    other => Ok(other.map(|r| r.status)),
                };
            }
            MrState::Open => {}
        }

        if existing.is_none() && !snapshot.is_assigned_to(self.settings.automation_user_id) {
            debug!(mr_iid = iid, "MR not assigned, ignoring");
            return Ok(None);
        }

        let (mut record, created) = self.store.observe(project, snapshot).await?;
        if created {
            info!(mr_iid = iid, title = %snapshot.title, "recognized MR");
            self.store
                .record_history(project, iid, HistoryAction::Recognized, json!({}), None)
                .await?;
            annotate::emit(self.sink.as_ref(), Annotation::Recognized { iid }).await;
        }

        if reassigned && let Some(reset) = policy::reset_on_reassign(record.status) {
            info!(mr_iid = iid, "re-assigned after rejection, resetting");
            self.persist(&record, &reset, json!({ "reset": true })).await?;
            annotate::emit(self.sink.as_ref(), Annotation::Recognized { iid }).await;
            record.status = reset.status;
            record.rejection_count = reset.rejection_count;
        }

        if record.status.is_terminal() {
            debug!(mr_iid = iid, status = %record.status, "terminal, not re-evaluating");
            return Ok(Some(record.status));
        }

        let readiness = readiness::evaluate(snapshot, self.settings.automation_user_id);
        let transition = policy::apply(
            record.status,
            record.rejection_count,
            &readiness,
            self.settings.rejection_threshold,
        );

        self.persist(&record, &transition, history_details(&readiness, &transition))
            .await?;
        self.announce(iid, &readiness, &transition).await;
        Ok(Some(transition.status))
    }

    async fn persist(
        &self,
        record: &MergeRequestRecord,
        transition: &Transition,
        details: serde_json::Value,
    ) -> Result<()> {
        let project = &self.settings.project;
        if transition.changes(record.status, record.rejection_count) {
            self.store
                .update_state(project, record.iid, transition.status, transition.rejection_count)
                .await?;
        }
        if let Some(action) = transition.history {
            self.store
                .record_history(project, record.iid, action, details, None)
                .await?;
        }
        Ok(())
    }

    async fn announce(&self, iid: u64, readiness: &Readiness, transition: &Transition) {
        let threshold = self.settings.rejection_threshold;
        let annotation = match &transition.obligation {
            Obligation::None => {
                if !readiness.is_ready() {
                    debug!(mr_iid = iid, reasons = ?readiness.messages(), "waiting on pipeline");
                }
                return;
            }
            Obligation::Ready => {
                info!(mr_iid = iid, "MR ready to merge");
                Annotation::Ready { iid }
            }
            Obligation::NotReady { reasons, strike } => {
                info!(mr_iid = iid, strike, threshold, reasons = ?readiness.messages(), "MR not ready");
                Annotation::NotReady {
                    iid,
                    reasons: reasons.iter().map(ToString::to_string).collect(),
                    strike: *strike,
                    threshold,
                }
            }
            Obligation::Rejected { reasons } => {
                info!(mr_iid = iid, reasons = ?readiness.messages(), "MR rejected");
                Annotation::Rejected {
                    iid,
                    reasons: reasons.iter().map(ToString::to_string).collect(),
                    threshold,
                }
            }
        };
        annotate::emit(self.sink.as_ref(), annotation).await;
    }
}

fn history_details(readiness: &Readiness, transition: &Transition) -> serde_json::Value {
    if readiness.is_ready() {
        return json!({});
    }
    json!({
        "reasons": readiness.messages(),
        "rejection_count": transition.rejection_count,
        "transient": readiness.is_transient(),
    })
}
