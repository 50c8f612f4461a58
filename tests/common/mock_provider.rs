//! Mock merge provider for testing
//!
//! These are test utilities - not all may be used in every test binary.

#![allow(dead_code)]

use async_trait::async_trait;
use merge_assist::error::{Error, Result};
use merge_assist::platform::MergeProvider;
use merge_assist::types::{
    CreatedMr, MergeOptions, MergeRequestSnapshot, MergeResult, MrState, Pipeline, PipelineStatus,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Every provider call, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FetchMr(u64),
    ListAssigned(u64),
    Rebase(u64),
    Merge { iid: u64, sha: Option<String> },
    AddLabels(u64, Vec<String>),
    RemoveLabels(u64, Vec<String>),
    Comment(u64, String),
    CreateBranch { branch: String, from: String },
    DeleteBranch(String),
    CreateAggregate { source: String, target: String, title: String },
    Close(u64),
    PipelineStatus(u64),
}

/// Operations that support error injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Fetch,
    Rebase,
    Merge,
    CreateBranch,
    CreateAggregate,
}

#[derive(Debug, Clone)]
struct Injected {
    message: String,
    fatal: bool,
    remaining: Option<u32>,
}

impl Injected {
    fn to_error(&self) -> Error {
        if self.fatal {
            Error::Invariant(self.message.clone())
        } else {
            Error::GitLabApi(self.message.clone())
        }
    }
}

/// Hand-written provider double
///
/// Keeps MR snapshots in memory, records calls for verification, supports
/// per-iid error injection and scripted pipeline sequences, and tracks how
/// many rebase/merge calls are in flight for each MR at once.
pub struct MockProvider {
    project: String,
    snapshots: Mutex<HashMap<u64, MergeRequestSnapshot>>,
    pipelines: Mutex<HashMap<u64, VecDeque<Pipeline>>>,
    aggregate_pipeline: Mutex<Vec<PipelineStatus>>,
    failures: Mutex<HashMap<(Op, u64), Injected>>,
    calls: Mutex<Vec<Call>>,
    next_iid: AtomicU64,
    op_delay: Mutex<Duration>,
    active: Mutex<HashMap<u64, usize>>,
    max_active: Mutex<HashMap<u64, usize>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Empty mock for project "42"
    pub fn new() -> Self {
        Self {
            project: "42".to_string(),
            snapshots: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(HashMap::new()),
            aggregate_pipeline: Mutex::new(vec![PipelineStatus::Success]),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_iid: AtomicU64::new(1000),
            op_delay: Mutex::new(Duration::ZERO),
            active: Mutex::new(HashMap::new()),
            max_active: Mutex::new(HashMap::new()),
        }
    }

    // === Setup ===

    /// Add or replace an MR
    pub fn put_mr(&self, snapshot: MergeRequestSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.iid, snapshot);
    }

    /// Modify a stored MR in place
    pub fn update_mr(&self, iid: u64, f: impl FnOnce(&mut MergeRequestSnapshot)) {
        let mut snapshots = self.snapshots.lock().unwrap();
        f(snapshots.get_mut(&iid).expect("unknown MR"));
    }

    /// Current stored snapshot
    pub fn mr(&self, iid: u64) -> MergeRequestSnapshot {
        self.snapshots.lock().unwrap()[&iid].clone()
    }

    /// Script pipeline results for an MR; the last entry repeats
    pub fn set_pipeline_sequence(&self, iid: u64, statuses: &[PipelineStatus]) {
        let sequence = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| Pipeline {
                id: i as u64 + 1,
                status: status.clone(),
                sha: None,
            })
            .collect();
        self.pipelines.lock().unwrap().insert(iid, sequence);
    }

    /// Pipeline with an explicit commit for an MR
    pub fn set_pipeline(&self, iid: u64, status: PipelineStatus, sha: &str) {
        let pipeline = Pipeline {
            id: 1,
            status,
            sha: Some(sha.to_string()),
        };
        self.pipelines
            .lock()
            .unwrap()
            .insert(iid, VecDeque::from([pipeline]));
    }

    /// Pipeline sequence every aggregate MR created from now on gets
    pub fn set_aggregate_pipeline(&self, statuses: &[PipelineStatus]) {
        *self.aggregate_pipeline.lock().unwrap() = statuses.to_vec();
    }

    /// Delay rebase and merge calls
    pub fn set_op_delay(&self, delay: Duration) {
        *self.op_delay.lock().unwrap() = delay;
    }

    // === Error injection ===

    /// Make `op` fail for `iid` (0 for branch/aggregate ops) every time
    pub fn fail(&self, op: Op, iid: u64, msg: &str) {
        self.inject(op, iid, msg, false, None);
    }

    /// Make `op` fail for `iid` the next `times` calls
    pub fn fail_times(&self, op: Op, iid: u64, msg: &str, times: u32) {
        self.inject(op, iid, msg, false, Some(times));
    }

    /// Make `op` fail with a fatal error the next `times` calls
    pub fn fail_fatal(&self, op: Op, iid: u64, msg: &str, times: u32) {
        self.inject(op, iid, msg, true, Some(times));
    }

    /// Remove injected failures for `op`
    pub fn clear_failure(&self, op: Op, iid: u64) {
        self.failures.lock().unwrap().remove(&(op, iid));
    }

    fn inject(&self, op: Op, iid: u64, msg: &str, fatal: bool, remaining: Option<u32>) {
        self.failures.lock().unwrap().insert(
            (op, iid),
            Injected {
                message: msg.to_string(),
                fatal,
                remaining,
            },
        );
    }

    fn check_failure(&self, op: Op, iid: u64) -> Result<()> {
        let mut failures = self.failures.lock().unwrap();
        let Some(injected) = failures.get_mut(&(op, iid)) else {
            return Ok(());
        };
        let err = injected.to_error();
        let exhausted = match injected.remaining.as_mut() {
            None => false,
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
        };
        if exhausted {
            failures.remove(&(op, iid));
        }
        Err(err)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn tracked<T>(&self, iid: u64, f: impl FnOnce() -> T) -> T {
        {
            let mut active = self.active.lock().unwrap();
            let count = active.entry(iid).or_insert(0);
            *count += 1;
            let mut max = self.max_active.lock().unwrap();
            let peak = max.entry(iid).or_insert(0);
            *peak = (*peak).max(*count);
        }
        let delay = *self.op_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = f();
        *self.active.lock().unwrap().get_mut(&iid).unwrap() -= 1;
        result
    }

    // === Verification ===

    /// Every recorded call
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Iids passed to `rebase`, in order
    pub fn rebase_calls(&self) -> Vec<u64> {
        self.filter_iids(|c| match c {
            Call::Rebase(iid) => Some(*iid),
            _ => None,
        })
    }

    /// Iids passed to `merge`, in order
    pub fn merge_calls(&self) -> Vec<u64> {
        self.filter_iids(|c| match c {
            Call::Merge { iid, .. } => Some(*iid),
            _ => None,
        })
    }

    /// Aggregate MRs closed
    pub fn closed(&self) -> Vec<u64> {
        self.filter_iids(|c| match c {
            Call::Close(iid) => Some(*iid),
            _ => None,
        })
    }

    /// Comments posted on `iid`
    pub fn comments_for(&self, iid: u64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Comment(i, body) if i == iid => Some(body),
                _ => None,
            })
            .collect()
    }

    /// Labels added to `iid`, flattened
    pub fn labels_added(&self, iid: u64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddLabels(i, labels) if i == iid => Some(labels),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Labels removed from `iid`, flattened
    pub fn labels_removed(&self, iid: u64) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::RemoveLabels(i, labels) if i == iid => Some(labels),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Branches created
    pub fn created_branches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateBranch { branch, .. } => Some(branch),
                _ => None,
            })
            .collect()
    }

    /// Branches deleted
    pub fn deleted_branches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeleteBranch(branch) => Some(branch),
                _ => None,
            })
            .collect()
    }

    /// Highest number of simultaneous rebase/merge calls seen for `iid`
    pub fn max_concurrency(&self, iid: u64) -> usize {
        self.max_active
            .lock()
            .unwrap()
            .get(&iid)
            .copied()
            .unwrap_or(0)
    }

    /// Assert `iid` was never merged
    pub fn assert_not_merged(&self, iid: u64) {
        assert!(
            !self.merge_calls().contains(&iid),
            "expected no merge call for !{iid}, calls: {:?}",
            self.calls()
        );
    }

    fn filter_iids(&self, f: impl Fn(&Call) -> Option<u64>) -> Vec<u64> {
        self.calls().iter().filter_map(f).collect()
    }
}

#[async_trait]
impl MergeProvider for MockProvider {
    fn project_ref(&self) -> &str {
        &self.project
    }

    async fn fetch_mr(&self, iid: u64) -> Result<MergeRequestSnapshot> {
        self.record(Call::FetchMr(iid));
        self.check_failure(Op::Fetch, iid)?;
        self.snapshots
            .lock()
            .unwrap()
            .get(&iid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("MR !{iid}")))
    }

    async fn list_assigned(&self, user_id: u64) -> Result<Vec<u64>> {
        self.record(Call::ListAssigned(user_id));
        let mut iids: Vec<u64> = self
            .snapshots
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.state == MrState::Open && s.is_assigned_to(user_id))
            .map(|s| s.iid)
            .collect();
        iids.sort_unstable();
        Ok(iids)
    }

    async fn rebase(&self, iid: u64) -> Result<()> {
        self.record(Call::Rebase(iid));
        self.tracked(iid, || self.check_failure(Op::Rebase, iid))
            .await
    }

    async fn merge(&self, iid: u64, options: &MergeOptions) -> Result<MergeResult> {
        self.record(Call::Merge {
            iid,
            sha: options.sha.clone(),
        });
        self.tracked(iid, || -> Result<MergeResult> {
            self.check_failure(Op::Merge, iid)?;
            if let Some(snapshot) = self.snapshots.lock().unwrap().get_mut(&iid) {
                snapshot.state = MrState::Merged;
            }
            Ok(MergeResult {
                merged: true,
                sha: Some(format!("merged-{iid}")),
                message: None,
            })
        })
        .await
    }

    async fn add_labels(&self, iid: u64, labels: &[String]) -> Result<()> {
        self.record(Call::AddLabels(iid, labels.to_vec()));
        Ok(())
    }

    async fn remove_labels(&self, iid: u64, labels: &[String]) -> Result<()> {
        self.record(Call::RemoveLabels(iid, labels.to_vec()));
        Ok(())
    }

    async fn create_comment(&self, iid: u64, body: &str) -> Result<()> {
        self.record(Call::Comment(iid, body.to_string()));
        Ok(())
    }

    async fn create_branch(&self, branch: &str, from_ref: &str) -> Result<()> {
        self.record(Call::CreateBranch {
            branch: branch.to_string(),
            from: from_ref.to_string(),
        });
        self.check_failure(Op::CreateBranch, 0)
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        self.record(Call::DeleteBranch(branch.to_string()));
        Ok(())
    }

    async fn create_aggregate_mr(
        &self,
        source: &str,
        target: &str,
        title: &str,
        _description: &str,
    ) -> Result<CreatedMr> {
        self.record(Call::CreateAggregate {
            source: source.to_string(),
            target: target.to_string(),
            title: title.to_string(),
        });
        self.check_failure(Op::CreateAggregate, 0)?;

        let iid = self.next_iid.fetch_add(1, Ordering::SeqCst);
        let sha = format!("batch-{iid}");
        let sequence = self
            .aggregate_pipeline
            .lock()
            .unwrap()
            .iter()
            .map(|status| Pipeline {
                id: iid,
                status: status.clone(),
                sha: Some(sha.clone()),
            })
            .collect();
        self.pipelines.lock().unwrap().insert(iid, sequence);

        Ok(CreatedMr {
            iid,
            web_url: format!("https://gitlab.example.com/group/app/-/merge_requests/{iid}"),
            sha: Some(sha),
        })
    }

    async fn close_mr(&self, iid: u64) -> Result<()> {
        self.record(Call::Close(iid));
        Ok(())
    }

    async fn pipeline_status(&self, iid: u64) -> Result<Option<Pipeline>> {
        self.record(Call::PipelineStatus(iid));
        let mut pipelines = self.pipelines.lock().unwrap();
        if let Some(sequence) = pipelines.get_mut(&iid) {
            if sequence.len() > 1 {
                return Ok(sequence.pop_front());
            }
            return Ok(sequence.front().cloned());
        }
        drop(pipelines);
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(&iid)
            .and_then(|s| s.pipeline.clone()))
    }
}
