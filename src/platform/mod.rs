//! Merge provider services
//!
//! Provides the interface the orchestration core uses to talk to the code
//! hosting platform. One provider instance serves one project.

mod gitlab;

pub use gitlab::{GitLabService, RetryPolicy};

use crate::error::Result;
use crate::types::{CreatedMr, MergeOptions, MergeRequestSnapshot, MergeResult, Pipeline};
use async_trait::async_trait;

/// Merge provider trait for MR operations
///
/// Every call is a single fallible unit. Retrying transient failures is the
/// implementation's job; callers treat an `Err` as "this attempt failed" and
/// carry on with the next cycle.
#[async_trait]
pub trait MergeProvider: Send + Sync {
    /// Project identifier on the provider (numeric ID or path)
    fn project_ref(&self) -> &str;

    /// Fetch the current state of an MR
    async fn fetch_mr(&self, iid: u64) -> Result<MergeRequestSnapshot>;

    /// List open MRs where `user_id` is assignee or reviewer
    async fn list_assigned(&self, user_id: u64) -> Result<Vec<u64>>;

    /// Rebase the MR's source branch onto its target branch
    ///
    /// Returns once the provider reports the rebase finished. A rebase the
    /// provider could not complete (e.g. conflicts) is an `Err`.
    async fn rebase(&self, iid: u64) -> Result<()>;

    /// Merge the MR
    async fn merge(&self, iid: u64, options: &MergeOptions) -> Result<MergeResult>;

    /// Add labels to an MR
    async fn add_labels(&self, iid: u64, labels: &[String]) -> Result<()>;

    /// Remove labels from an MR
    async fn remove_labels(&self, iid: u64, labels: &[String]) -> Result<()>;

    /// Post a comment on an MR
    async fn create_comment(&self, iid: u64, body: &str) -> Result<()>;

    /// Create `branch` from `from_ref`
    async fn create_branch(&self, branch: &str, from_ref: &str) -> Result<()>;

    /// Delete `branch`
    async fn delete_branch(&self, branch: &str) -> Result<()>;

    /// Open an aggregate MR from `source` into `target`
    async fn create_aggregate_mr(
        &self,
        source: &str,
        target: &str,
        title: &str,
        description: &str,
    ) -> Result<CreatedMr>;

    /// Close an MR without merging
    async fn close_mr(&self, iid: u64) -> Result<()>;

    /// Head pipeline of the MR, if one exists
    async fn pipeline_status(&self, iid: u64) -> Result<Option<Pipeline>>;
}
