//! Annotation obligations
//!
//! The orchestration core never talks to humans directly. It emits typed
//! [`Annotation`] events and an [`AnnotationSink`] decides how to render
//! them (comments and labels on the MR, in production).

mod comments;

pub use comments::{CommentingSink, render};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use tracing::warn;

/// How an MR got merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Merged on its own
    Single,
    /// Merged as a member of a validated batch
    Batch,
}

/// Something the annotation layer must tell the MR's humans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// MR is now governed
    Recognized {
        /// MR iid
        iid: u64,
    },
    /// Persistent not-ready cycle
    NotReady {
        /// MR iid
        iid: u64,
        /// Failing reasons this cycle
        reasons: Vec<String>,
        /// Strike count after this cycle
        strike: u32,
        /// Strikes that trigger rejection
        threshold: u32,
    },
    /// Strike threshold reached
    Rejected {
        /// MR iid
        iid: u64,
        /// Reasons of the final cycle
        reasons: Vec<String>,
        /// Strikes that triggered rejection
        threshold: u32,
    },
    /// Passed every readiness check
    Ready {
        /// MR iid
        iid: u64,
    },
    /// Automatic rebase failed
    RebaseFailed {
        /// MR iid
        iid: u64,
        /// Provider's cause
        cause: String,
    },
    /// MR merged
    MergeSucceeded {
        /// MR iid
        iid: u64,
        /// Single or batch
        mode: MergeMode,
    },
    /// MR is waiting on an aggregate batch MR
    BatchInProgress {
        /// MR iid
        iid: u64,
        /// Aggregate MR iid
        batch_iid: u64,
    },
    /// Pipeline failure/timeout or merge failure
    ExecutionFailed {
        /// MR iid
        iid: u64,
        /// What went wrong
        cause: String,
    },
}

impl Annotation {
    /// MR the annotation is about
    pub const fn iid(&self) -> u64 {
        match self {
            Self::Recognized { iid }
            | Self::NotReady { iid, .. }
            | Self::Rejected { iid, .. }
            | Self::Ready { iid }
            | Self::RebaseFailed { iid, .. }
            | Self::MergeSucceeded { iid, .. }
            | Self::BatchInProgress { iid, .. }
            | Self::ExecutionFailed { iid, .. } => *iid,
        }
    }

    /// Short tag for logs
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Recognized { .. } => "recognized",
            Self::NotReady { .. } => "not_ready",
            Self::Rejected { .. } => "rejected",
            Self::Ready { .. } => "ready",
            Self::RebaseFailed { .. } => "rebase_failed",
            Self::MergeSucceeded { .. } => "merge_succeeded",
            Self::BatchInProgress { .. } => "batch_in_progress",
            Self::ExecutionFailed { .. } => "execution_failed",
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} !{}", self.kind(), self.iid())
    }
}

/// Consumer of annotation obligations
#[async_trait]
pub trait AnnotationSink: Send + Sync {
    /// Render and deliver one annotation
    async fn annotate(&self, annotation: &Annotation) -> Result<()>;
}

/// Deliver an annotation, logging instead of failing.
///
/// Annotation delivery never affects persisted state.
pub async fn emit(sink: &dyn AnnotationSink, annotation: Annotation) {
    if let Err(e) = sink.annotate(&annotation).await {
        warn!(mr_iid = annotation.iid(), kind = annotation.kind(), error = %e, "failed to deliver annotation");
    }
}
