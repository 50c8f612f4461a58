//! Readiness validation - pure evaluation of one MR snapshot
//!
//! Every predicate is evaluated; the result carries the union of failing
//! reasons in a fixed order. Deciding which reasons count as strikes is the
//! caller's job (see [`crate::policy`]).

use crate::types::{MergeRequestSnapshot, PipelineStatus};
use std::fmt;

/// Merge statuses GitLab reports for a mergeable MR
const MERGEABLE_STATUSES: [&str; 2] = ["can_be_merged", "mergeable"];

/// Why an MR cannot be merged right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockingReason {
    /// Automation identity is neither assignee nor reviewer
    NotAssigned,
    /// Draft / work-in-progress
    Draft,
    /// Provider reports conflicts with the target branch
    Conflicts,
    /// Blocking discussions are open
    DiscussionsUnresolved,
    /// Provider merge status is not mergeable
    MergeStatus(String),
    /// MR has no pipeline at all
    NoPipeline,
    /// Pipeline has not finished
    PipelineInProgress(PipelineStatus),
    /// Pipeline finished without success
    PipelineUnsuccessful(PipelineStatus),
}

impl BlockingReason {
    /// Reasons that resolve on their own and never count as a strike
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::PipelineInProgress(_))
    }
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAssigned => write!(f, "MR not assigned to Merge Assist"),
            Self::Draft => write!(f, "MR is WIP/Draft"),
            Self::Conflicts => write!(f, "MR has conflicts"),
            Self::DiscussionsUnresolved => write!(f, "Blocking discussions not resolved"),
            Self::MergeStatus(status) => write!(f, "Merge status: {status}"),
            Self::NoPipeline => write!(f, "No pipeline found"),
            Self::PipelineInProgress(status) => write!(f, "Pipeline still {status}"),
            Self::PipelineUnsuccessful(status) => write!(f, "Pipeline {status}"),
        }
    }
}

/// Outcome of [`evaluate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Failing predicates, in evaluation order
    pub reasons: Vec<BlockingReason>,
}

impl Readiness {
    /// No predicate failed
    pub fn is_ready(&self) -> bool {
        self.reasons.is_empty()
    }

    /// Not ready, but only because the pipeline is still going
    pub fn is_transient(&self) -> bool {
        !self.reasons.is_empty() && self.reasons.iter().all(BlockingReason::is_transient)
    }

    /// Human-readable reasons
    pub fn messages(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}

/// Evaluate an MR against the merge-readiness predicates.
///
/// Order: assignment, draft, conflicts, discussions and merge status,
/// pipeline.
pub fn evaluate(snapshot: &MergeRequestSnapshot, automation_user_id: u64) -> Readiness {
    let mut reasons = Vec::new();

    if !snapshot.is_assigned_to(automation_user_id) {
        reasons.push(BlockingReason::NotAssigned);
    }

    if snapshot.draft {
        reasons.push(BlockingReason::Draft);
    }

    if snapshot.has_conflicts {
        reasons.push(BlockingReason::Conflicts);
    }

    if !snapshot.blocking_discussions_resolved {
        reasons.push(BlockingReason::DiscussionsUnresolved);
    } else if !MERGEABLE_STATUSES.contains(&snapshot.merge_status.as_str()) {
        reasons.push(BlockingReason::MergeStatus(snapshot.merge_status.clone()));
    }

    match snapshot.pipeline.as_ref().map(|p| &p.status) {
        None => reasons.push(BlockingReason::NoPipeline),
        Some(PipelineStatus::Success) => {}
        Some(status) if status.is_in_progress() => {
            reasons.push(BlockingReason::PipelineInProgress(status.clone()));
        }
        Some(status) => reasons.push(BlockingReason::PipelineUnsuccessful(status.clone())),
    }

    Readiness { reasons }
}
