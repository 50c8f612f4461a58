//! Bounded, cancellable wait for an MR pipeline

use crate::platform::MergeProvider;
use crate::types::PipelineStatus;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a pipeline wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Pipeline for the expected commit passed
    Success,
    /// Pipeline ended without success
    Failed(PipelineStatus),
    /// Gave up after the configured timeout
    Timeout,
    /// Shutdown requested
    Cancelled,
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "pipeline succeeded"),
            Self::Failed(status) => write!(f, "pipeline failed ({status})"),
            Self::Timeout => write!(f, "pipeline timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// `now + delay`, saturating far in the future instead of overflowing
fn instant_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + Duration::from_secs(30 * 365 * 24 * 3600))
}

/// Poll the MR's head pipeline until it finishes, `timeout` elapses or
/// `cancel` fires.
///
/// A pipeline for a different commit than `expected_sha`, a missing
/// pipeline and a failed status query all count as "not finished yet".
pub async fn wait_for_pipeline(
    provider: &dyn MergeProvider,
    iid: u64,
    expected_sha: Option<&str>,
    poll_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> PipelineOutcome {
    let deadline = instant_after(timeout);

    loop {
        let polled = tokio::select! {
            () = cancel.cancelled() => return PipelineOutcome::Cancelled,
            () = tokio::time::sleep_until(deadline) => return PipelineOutcome::Timeout,
            result = provider.pipeline_status(iid) => result,
        };

        match polled {
            Ok(Some(pipeline)) => {
                let current = match (expected_sha, pipeline.sha.as_deref()) {
                    (Some(expected), Some(actual)) => expected == actual,
                    _ => true,
                };
                if current {
                    if pipeline.status == PipelineStatus::Success {
                        return PipelineOutcome::Success;
                    }
                    if pipeline.status.is_failure() {
                        return PipelineOutcome::Failed(pipeline.status);
                    }
                }
                debug!(mr_iid = iid, status = %pipeline.status, current, "pipeline not finished");
            }
            Ok(None) => debug!(mr_iid = iid, "no pipeline yet"),
            Err(e) => warn!(mr_iid = iid, error = %e, "pipeline status query failed"),
        }

        let wake = instant_after(poll_interval).min(deadline);
        tokio::select! {
            () = cancel.cancelled() => return PipelineOutcome::Cancelled,
            () = tokio::time::sleep_until(wake) => {}
        }
        if Instant::now() >= deadline {
            return PipelineOutcome::Timeout;
        }
    }
}
