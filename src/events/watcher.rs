//! Periodic assignment sweep
//!
//! Webhook delivery is best-effort, so every sweep interval the watcher
//! lists the MRs assigned to the automation user and publishes them. An MR
//! that shows up again after being absent from a previous sweep is
//! published as re-assigned.

use super::{EventHub, MrEvent};
use crate::error::Result;
use crate::platform::MergeProvider;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Publishes assigned MRs for one project
pub struct Watcher {
    project: String,
    provider: Arc<dyn MergeProvider>,
    hub: EventHub,
    automation_user_id: u64,
    interval: Duration,
    seen: Option<HashSet<u64>>,
}

impl Watcher {
    /// Create a watcher for `project`
    pub fn new(
        project: impl Into<String>,
        provider: Arc<dyn MergeProvider>,
        hub: EventHub,
        automation_user_id: u64,
        interval: Duration,
    ) -> Self {
        Self {
            project: project.into(),
            provider,
            hub,
            automation_user_id,
            interval,
            seen: None,
        }
    }

    /// Run one sweep; returns the number of MRs published
    pub async fn sweep(&mut self) -> Result<usize> {
        let assigned = self.provider.list_assigned(self.automation_user_id).await?;
        let current: HashSet<u64> = assigned.iter().copied().collect();

        for &iid in &assigned {
            let returning = self.seen.as_ref().is_some_and(|seen| !seen.contains(&iid));
            let event = if returning {
                MrEvent::reassigned(iid)
            } else {
                MrEvent::changed(iid)
            };
            self.hub.publish(&self.project, event);
        }

        debug!(project = %self.project, count = assigned.len(), "sweep published assigned MRs");
        self.seen = Some(current);
        Ok(assigned.len())
    }

    /// Sweep until cancelled. Sweep failures are logged and retried next
    /// interval.
    #[instrument(skip_all, fields(project = %self.project))]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("watcher started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("watcher stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "assignment sweep failed");
                    }
                }
            }
        }
    }
}
