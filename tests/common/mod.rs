//! Shared test utilities

#![allow(dead_code)]

mod mock_provider;
mod recording_sink;

pub use mock_provider::{Call, MockProvider, Op};
pub use recording_sink::RecordingSink;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use merge_assist::config::ProjectSettings;
use merge_assist::events::{EventHub, HubEventSource};
use merge_assist::merge::MergeExecutor;
use merge_assist::reconcile::ProjectLoop;
use merge_assist::store::Store;
use merge_assist::types::{
    MergeRequestRecord, MergeRequestSnapshot, MrState, MrStatus, Pipeline, PipelineStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Automation user used throughout the tests
pub const BOT: u64 = 99;

/// Project key used throughout the tests
pub const PROJECT: &str = "app";

/// Open MR targeting `main` that passes every readiness check
pub fn ready_mr(iid: u64) -> MergeRequestSnapshot {
    MergeRequestSnapshot {
        iid,
        title: format!("Change {iid}"),
        source_branch: format!("feature-{iid}"),
        target_branch: "main".to_string(),
        state: MrState::Open,
        draft: false,
        has_conflicts: false,
        blocking_discussions_resolved: true,
        merge_status: "can_be_merged".to_string(),
        assignee_ids: vec![BOT],
        reviewer_ids: vec![],
        pipeline: Some(Pipeline {
            id: iid,
            status: PipelineStatus::Success,
            sha: None,
        }),
        sha: Some(format!("sha-{iid}")),
        web_url: format!("https://gitlab.example.com/group/app/-/merge_requests/{iid}"),
    }
}

/// Ready MR with conflicts
pub fn conflicted_mr(iid: u64) -> MergeRequestSnapshot {
    MergeRequestSnapshot {
        has_conflicts: true,
        merge_status: "cannot_be_merged".to_string(),
        ..ready_mr(iid)
    }
}

/// Settings with millisecond timings so tests run fast
pub fn fast_settings() -> ProjectSettings {
    ProjectSettings {
        poll_interval: Duration::from_millis(5),
        pipeline_timeout: Duration::from_millis(200),
        sweep_interval: Duration::from_millis(50),
        ..ProjectSettings::new(PROJECT, BOT)
    }
}

/// Fixed base time for records
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// Stored record recognized `offset_secs` after [`base_time`]
pub fn make_record(iid: u64, target: &str, offset_secs: i64) -> MergeRequestRecord {
    MergeRequestRecord {
        project: PROJECT.to_string(),
        iid,
        title: format!("Change {iid}"),
        source_branch: format!("feature-{iid}"),
        target_branch: target.to_string(),
        status: MrStatus::Ready,
        rejection_count: 0,
        priority: 0,
        recognized_at: base_time() + ChronoDuration::seconds(offset_secs),
        merged_at: None,
    }
}

/// Everything a project loop needs, wired to test doubles
pub struct Harness {
    pub provider: Arc<MockProvider>,
    pub sink: Arc<RecordingSink>,
    pub store: Store,
    pub hub: EventHub,
    pub settings: ProjectSettings,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(fast_settings()).await
    }

    pub async fn with_settings(settings: ProjectSettings) -> Self {
        Self {
            provider: Arc::new(MockProvider::new()),
            sink: Arc::new(RecordingSink::new()),
            store: Store::open_in_memory().await.unwrap(),
            hub: EventHub::new(),
            settings,
        }
    }

    /// Project loop over the harness collaborators
    pub fn project_loop(&self) -> ProjectLoop {
        ProjectLoop::new(
            self.settings.clone(),
            self.provider.clone(),
            self.sink.clone(),
            Arc::new(HubEventSource::new(self.hub.clone(), self.store.clone())),
            self.store.clone(),
        )
    }

    /// Put `snapshot` on the provider and record it as `ready`
    pub async fn seed_ready(&self, snapshot: MergeRequestSnapshot) -> MergeRequestRecord {
        let (record, _) = self.store.observe(PROJECT, &snapshot).await.unwrap();
        self.store
            .update_state(PROJECT, record.iid, MrStatus::Ready, 0)
            .await
            .unwrap();
        self.provider.put_mr(snapshot);
        self.record(record.iid).await
    }

    /// Executor over the harness collaborators
    pub fn executor<'a>(&'a self, cancel: &'a CancellationToken) -> MergeExecutor<'a> {
        MergeExecutor::new(
            self.provider.as_ref(),
            self.sink.as_ref(),
            &self.store,
            &self.settings,
            cancel,
        )
    }

    /// Current status of `iid`
    pub async fn status(&self, iid: u64) -> Option<MrStatus> {
        self.store
            .get(PROJECT, iid)
            .await
            .unwrap()
            .map(|r| r.status)
    }

    /// Stored record of `iid`
    pub async fn record(&self, iid: u64) -> MergeRequestRecord {
        self.store.get(PROJECT, iid).await.unwrap().unwrap()
    }
}
