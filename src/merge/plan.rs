//! Batch composition - pure functions for choosing the next merge work
//!
//! No I/O happens here. The reconciliation loop hands in the current ready
//! set and gets back what to merge, so the same snapshot always yields the
//! same plan.

use crate::types::MergeRequestRecord;
use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;

/// One unit of merge work for a target branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    /// Merge a single MR on its own
    Single(MergeRequestRecord),
    /// Validate several MRs together, then merge them one by one
    Batch {
        /// Shared target branch
        target_branch: String,
        /// Members in selection order
        members: Vec<MergeRequestRecord>,
    },
}

impl WorkUnit {
    /// Target branch of the unit
    pub fn target_branch(&self) -> &str {
        match self {
            Self::Single(mr) => &mr.target_branch,
            Self::Batch { target_branch, .. } => target_branch,
        }
    }

    /// First MR in selection order
    pub fn head(&self) -> Option<&MergeRequestRecord> {
        match self {
            Self::Single(mr) => Some(mr),
            Self::Batch { members, .. } => members.first(),
        }
    }

    /// Member iids in selection order
    pub fn iids(&self) -> Vec<u64> {
        match self {
            Self::Single(mr) => vec![mr.iid],
            Self::Batch { members, .. } => members.iter().map(|m| m.iid).collect(),
        }
    }
}

/// Selection order: first recognized first, then higher priority, then
/// lower iid.
pub fn selection_order(a: &MergeRequestRecord, b: &MergeRequestRecord) -> Ordering {
    (a.recognized_at, Reverse(a.priority), a.iid).cmp(&(b.recognized_at, Reverse(b.priority), b.iid))
}

/// Compose one work unit per target branch, ordered by branch name.
///
/// A branch with at least `batch_size` ready MRs (and `batch_size > 1`)
/// yields a batch of exactly `batch_size` MRs; any other branch yields its
/// first MR in selection order.
pub fn compose(ready: &[MergeRequestRecord], batch_size: usize) -> Vec<WorkUnit> {
    let mut by_branch: BTreeMap<&str, Vec<&MergeRequestRecord>> = BTreeMap::new();
    for mr in ready {
        by_branch.entry(mr.target_branch.as_str()).or_default().push(mr);
    }

    by_branch
        .into_iter()
        .filter_map(|(branch, mut mrs)| {
            mrs.sort_by(|a, b| selection_order(a, b));

            if batch_size > 1 && mrs.len() >= batch_size {
                Some(WorkUnit::Batch {
                    target_branch: branch.to_string(),
                    members: mrs.into_iter().take(batch_size).cloned().collect(),
                })
            } else {
                mrs.first().map(|mr| WorkUnit::Single((*mr).clone()))
            }
        })
        .collect()
}

/// The single unit to execute this tick.
///
/// Picks the unit whose head MR comes first in selection order; branch name
/// breaks remaining ties.
pub fn next_unit(ready: &[MergeRequestRecord], batch_size: usize) -> Option<WorkUnit> {
    compose(ready, batch_size).into_iter().min_by(|a, b| {
        let heads = match (a.head(), b.head()) {
            (Some(x), Some(y)) => selection_order(x, y),
            _ => Ordering::Equal,
        };
        heads.then_with(|| a.target_branch().cmp(b.target_branch()))
    })
}
