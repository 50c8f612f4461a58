//! Annotation sink that posts MR comments and toggles labels

use super::{Annotation, AnnotationSink, MergeMode};
use crate::config::LabelConfig;
use crate::error::Result;
use crate::platform::MergeProvider;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

const SIGNATURE: &str = "\n\n---\n*Posted by Merge Assist*";

/// Renders annotations as GitLab comments and labels
pub struct CommentingSink {
    provider: Arc<dyn MergeProvider>,
    labels: LabelConfig,
}

impl CommentingSink {
    /// Create a sink posting through `provider`
    pub fn new(provider: Arc<dyn MergeProvider>, labels: LabelConfig) -> Self {
        Self { provider, labels }
    }

    async fn swap_labels(&self, iid: u64, add: &[&String], remove: &[&String]) -> Result<()> {
        if !remove.is_empty() {
            let remove: Vec<String> = remove.iter().map(|l| (*l).clone()).collect();
            self.provider.remove_labels(iid, &remove).await?;
        }
        if !add.is_empty() {
            let add: Vec<String> = add.iter().map(|l| (*l).clone()).collect();
            self.provider.add_labels(iid, &add).await?;
        }
        Ok(())
    }
}

fn bullet_list(reasons: &[String]) -> String {
    reasons.iter().fold(String::new(), |mut out, reason| {
        let _ = writeln!(out, "- {reason}");
        out
    })
}

/// Comment body for an annotation, or `None` for label-only annotations
pub fn render(annotation: &Annotation) -> Option<String> {
    let message = match annotation {
        Annotation::Recognized { .. } | Annotation::Ready { .. } => return None,
        Annotation::NotReady {
            reasons,
            strike,
            threshold,
            ..
        } => format!(
            "## MR Not Ready for Merge\n\n**Attempt {strike}/{threshold}**\n\n\
             This merge request is not ready to be merged. Please address the following issues:\n\n\
             {}\nOnce these issues are resolved, I will automatically attempt to merge again.",
            bullet_list(reasons)
        ),
        Annotation::Rejected {
            reasons, threshold, ..
        } => format!(
            "## MR Rejected\n\n\
             This merge request has been rejected after {threshold} attempts due to persistent issues:\n\n\
             {}\n**Action Required**: Please fix the issues and reassign this MR to Merge Assist when ready.",
            bullet_list(reasons)
        ),
        Annotation::RebaseFailed { cause, .. } => format!(
            "## Rebase Failed\n\nAutomatic rebase with the target branch failed.\n\n\
             **Error**: {cause}\n\n\
             **Action Required**: Please manually rebase this MR with the target branch."
        ),
        Annotation::MergeSucceeded {
            mode: MergeMode::Single,
            ..
        } => "## Successfully Merged\n\nThis MR has been automatically merged.".to_string(),
        Annotation::MergeSucceeded {
            mode: MergeMode::Batch,
            ..
        } => "## Successfully Merged (Batch)\n\n\
              This MR has been merged as part of a batch merge operation."
            .to_string(),
        Annotation::BatchInProgress { batch_iid, .. } => format!(
            "## Batch Merge in Progress\n\nThis MR is part of a batch merge operation.\n\n\
             **Batch MR**: !{batch_iid}\n\n\
             I'm waiting for the batch pipeline to complete. Once successful, this MR will be merged automatically."
        ),
        Annotation::ExecutionFailed { cause, .. } => format!(
            "## Merge Attempt Failed\n\nAn error occurred while merging this MR:\n\n```\n{cause}\n```\n\n\
             The MR stays queued and will be retried on the next cycle."
        ),
    };

    Some(format!("{message}{SIGNATURE}"))
}

#[async_trait]
impl AnnotationSink for CommentingSink {
    async fn annotate(&self, annotation: &Annotation) -> Result<()> {
        let iid = annotation.iid();
        let labels = &self.labels;
        debug!(mr_iid = iid, kind = annotation.kind(), "annotating MR");

        match annotation {
            Annotation::Recognized { .. } => {
                self.swap_labels(iid, &[&labels.recognized], &[&labels.rejected])
                    .await?;
            }
            Annotation::Ready { .. } => {
                self.swap_labels(iid, &[&labels.ready_to_merge], &[&labels.not_ready])
                    .await?;
            }
            Annotation::NotReady { .. } => {
                self.swap_labels(iid, &[&labels.not_ready], &[&labels.ready_to_merge])
                    .await?;
            }
            Annotation::Rejected { .. } => {
                self.swap_labels(
                    iid,
                    &[&labels.rejected],
                    &[&labels.not_ready, &labels.ready_to_merge],
                )
                .await?;
            }
            _ => {}
        }

        if let Some(body) = render(annotation) {
            self.provider.create_comment(iid, &body).await?;
        }
        Ok(())
    }
}
