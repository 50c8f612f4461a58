//! Core types for merge-assist

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// =============================================================================
// Provider-side view of a merge request
// =============================================================================

/// MR state as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MrState {
    /// MR is open
    Open,
    /// MR was closed without merging
    Closed,
    /// MR was merged
    Merged,
}

impl fmt::Display for MrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// CI pipeline status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    /// Pipeline created, jobs not started
    Created,
    /// Waiting for a runner or resource
    WaitingForResource,
    /// Runner preparing
    Preparing,
    /// Jobs queued
    Pending,
    /// Jobs running
    Running,
    /// All jobs passed
    Success,
    /// At least one job failed
    Failed,
    /// Pipeline was canceled
    Canceled,
    /// Pipeline was skipped
    Skipped,
    /// Waiting on a manual action
    Manual,
    /// Delayed start
    Scheduled,
    /// Status string this crate does not know
    Other(String),
}

impl PipelineStatus {
    /// Parse the provider's status string
    pub fn parse(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "waiting_for_resource" => Self::WaitingForResource,
            "preparing" => Self::Preparing,
            "pending" => Self::Pending,
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            "skipped" => Self::Skipped,
            "manual" => Self::Manual,
            "scheduled" => Self::Scheduled,
            other => Self::Other(other.to_string()),
        }
    }

    /// The pipeline has not reached a final state yet
    pub const fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::WaitingForResource
                | Self::Preparing
                | Self::Pending
                | Self::Running
                | Self::Scheduled
        )
    }

    /// The pipeline ended without success
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled | Self::Skipped)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::WaitingForResource => "waiting_for_resource",
            Self::Preparing => "preparing",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// The head pipeline of an MR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline ID
    pub id: u64,
    /// Current status
    pub status: PipelineStatus,
    /// Commit the pipeline runs against
    pub sha: Option<String>,
}

/// Point-in-time view of a merge request, as fetched from the provider
///
/// This is everything the readiness validator looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequestSnapshot {
    /// MR internal ID (per project)
    pub iid: u64,
    /// MR title
    pub title: String,
    /// Source branch name
    pub source_branch: String,
    /// Target branch name
    pub target_branch: String,
    /// Open/closed/merged
    pub state: MrState,
    /// Draft or work-in-progress flag
    pub draft: bool,
    /// Provider reports merge conflicts
    pub has_conflicts: bool,
    /// All blocking discussions resolved
    pub blocking_discussions_resolved: bool,
    /// Provider merge status (e.g. `can_be_merged`)
    pub merge_status: String,
    /// User IDs assigned to the MR
    pub assignee_ids: Vec<u64>,
    /// User IDs requested as reviewers
    pub reviewer_ids: Vec<u64>,
    /// Head pipeline, if any
    pub pipeline: Option<Pipeline>,
    /// Head commit SHA
    pub sha: Option<String>,
    /// Web URL for the MR
    pub web_url: String,
}

impl MergeRequestSnapshot {
    /// Whether `user_id` is an assignee or reviewer
    pub fn is_assigned_to(&self, user_id: u64) -> bool {
        self.assignee_ids.contains(&user_id) || self.reviewer_ids.contains(&user_id)
    }
}

/// MR created by the provider (aggregate MRs)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedMr {
    /// MR internal ID
    pub iid: u64,
    /// Web URL
    pub web_url: String,
    /// Head commit SHA
    pub sha: Option<String>,
}

/// Options for a merge call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Delete the source branch after merging
    pub remove_source_branch: bool,
    /// Only merge if the head is still this commit
    pub sha: Option<String>,
    /// Custom merge commit message
    pub commit_message: Option<String>,
}

/// Result of a merge operation
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Whether the merge was successful
    pub merged: bool,
    /// The SHA of the merge commit (if successful)
    pub sha: Option<String>,
    /// Message from the merge operation (especially on failure)
    pub message: Option<String>,
}

// =============================================================================
// Persisted records
// =============================================================================

/// Lifecycle status of a governed MR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MrStatus {
    /// Observed, not evaluated yet
    Recognized,
    /// Passed every readiness predicate
    Ready,
    /// Failed at least one readiness predicate
    NotReady,
    /// Merged into its target branch
    Merged,
    /// Gave up after too many not-ready cycles
    Rejected,
}

impl MrStatus {
    /// Storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recognized => "recognized",
            Self::Ready => "ready",
            Self::NotReady => "not_ready",
            Self::Merged => "merged",
            Self::Rejected => "rejected",
        }
    }

    /// No automatic re-evaluation happens from this state
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Rejected)
    }
}

impl fmt::Display for MrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MrStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recognized" => Ok(Self::Recognized),
            "ready" => Ok(Self::Ready),
            "not_ready" => Ok(Self::NotReady),
            "merged" => Ok(Self::Merged),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::Invariant(format!("unknown MR status '{other}'"))),
        }
    }
}

/// One governed MR, unique per (project, iid)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeRequestRecord {
    /// Local project key
    pub project: String,
    /// MR internal ID on the provider
    pub iid: u64,
    /// MR title
    pub title: String,
    /// Source branch name
    pub source_branch: String,
    /// Target branch name
    pub target_branch: String,
    /// Lifecycle status
    pub status: MrStatus,
    /// Consecutive not-ready evaluations since the last `ready`
    pub rejection_count: u32,
    /// Higher is served first among MRs recognized at the same instant
    pub priority: i64,
    /// First observation time
    pub recognized_at: DateTime<Utc>,
    /// Merge time
    pub merged_at: Option<DateTime<Utc>>,
}

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, aggregate MR not opened yet
    Pending,
    /// Waiting for the aggregate pipeline
    PipelineRunning,
    /// Aggregate pipeline passed
    PipelineSuccess,
    /// Aggregate pipeline failed or timed out
    PipelineFailed,
    /// Merging members one by one
    Merging,
    /// All members processed
    Completed,
    /// Batch abandoned
    Failed,
}

impl BatchStatus {
    /// Storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PipelineRunning => "pipeline_running",
            Self::PipelineSuccess => "pipeline_success",
            Self::PipelineFailed => "pipeline_failed",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal batches are never mutated again
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "pipeline_running" => Ok(Self::PipelineRunning),
            "pipeline_success" => Ok(Self::PipelineSuccess),
            "pipeline_failed" => Ok(Self::PipelineFailed),
            "merging" => Ok(Self::Merging),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Invariant(format!("unknown batch status '{other}'"))),
        }
    }
}

/// One batch integration attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOperation {
    /// Row ID
    pub id: i64,
    /// Local project key
    pub project: String,
    /// Shared target branch
    pub target_branch: String,
    /// Ephemeral integration branch
    pub batch_branch: String,
    /// Aggregate MR, once created
    pub batch_mr_iid: Option<u64>,
    /// Member MR iids in selection order
    pub members: Vec<u64>,
    /// Lifecycle status
    pub status: BatchStatus,
    /// Failure detail
    pub error_message: Option<String>,
    /// Members merged
    pub merged_count: u32,
    /// Members that failed to rebase or merge
    pub failed_count: u32,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
}

/// Audit action tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// First observation, or reset after re-assignment
    Recognized,
    /// Passed readiness
    Ready,
    /// Failed readiness
    NotReady,
    /// Terminally rejected
    Rejected,
    /// Merged
    Merged,
    /// Executor failure
    Failed,
    /// Priority changed by an operator
    PrioritySet,
}

impl HistoryAction {
    /// Storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recognized => "recognized",
            Self::Ready => "ready",
            Self::NotReady => "not_ready",
            Self::Rejected => "rejected",
            Self::Merged => "merged",
            Self::Failed => "failed",
            Self::PrioritySet => "priority_set",
        }
    }
}

impl FromStr for HistoryAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recognized" => Ok(Self::Recognized),
            "ready" => Ok(Self::Ready),
            "not_ready" => Ok(Self::NotReady),
            "rejected" => Ok(Self::Rejected),
            "merged" => Ok(Self::Merged),
            "failed" => Ok(Self::Failed),
            "priority_set" => Ok(Self::PrioritySet),
            other => Err(Error::Invariant(format!("unknown history action '{other}'"))),
        }
    }
}

/// Immutable audit event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeHistoryEntry {
    /// Row ID
    pub id: i64,
    /// Local project key
    pub project: String,
    /// MR internal ID
    pub iid: u64,
    /// What happened
    pub action: HistoryAction,
    /// Structured detail
    pub details: serde_json::Value,
    /// Related batch, if any
    pub batch_id: Option<i64>,
    /// When it happened
    pub created_at: DateTime<Utc>,
}
