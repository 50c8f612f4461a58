//! GitLab webhook payload parsing
//!
//! Only the payload is handled here; receiving webhooks over HTTP is left
//! to whatever fronts the service.

use super::{EventHub, MrEvent};
use crate::config::Config;
use crate::error::{Error, Result};
use serde::Deserialize;
use tracing::debug;

/// A webhook that concerns a governed MR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// GitLab numeric project ID
    pub project_id: u64,
    /// `group/project` path, when the payload carries it
    pub project_path: Option<String>,
    /// The notification to publish
    pub event: MrEvent,
}

#[derive(Deserialize)]
struct ProjectRef {
    id: u64,
    path_with_namespace: Option<String>,
}

#[derive(Deserialize)]
struct UserRef {
    id: u64,
}

#[derive(Deserialize)]
struct IidRef {
    iid: u64,
}

#[derive(Deserialize, Default)]
struct UserChange {
    #[serde(default)]
    previous: Vec<UserRef>,
    #[serde(default)]
    current: Vec<UserRef>,
}

#[derive(Deserialize, Default)]
struct MrChanges {
    #[serde(default)]
    assignees: Option<UserChange>,
    #[serde(default)]
    reviewers: Option<UserChange>,
}

#[derive(Deserialize)]
struct MrAttributes {
    iid: u64,
}

#[derive(Deserialize)]
struct PipelineAttributes {
    status: String,
}

#[derive(Deserialize)]
#[serde(tag = "object_kind", rename_all = "snake_case")]
enum Payload {
    MergeRequest {
        project: ProjectRef,
        object_attributes: MrAttributes,
        #[serde(default)]
        assignees: Vec<UserRef>,
        #[serde(default)]
        reviewers: Vec<UserRef>,
        #[serde(default)]
        changes: MrChanges,
    },
    Pipeline {
        project: ProjectRef,
        object_attributes: PipelineAttributes,
        merge_request: Option<IidRef>,
    },
    #[serde(other)]
    Other,
}

fn contains(users: &[UserRef], user_id: u64) -> bool {
    users.iter().any(|u| u.id == user_id)
}

fn newly_added(change: Option<&UserChange>, user_id: u64) -> bool {
    change.is_some_and(|c| contains(&c.current, user_id) && !contains(&c.previous, user_id))
}

/// Parse a GitLab webhook body.
///
/// - `merge_request` hooks yield an event when the automation user is an
///   assignee or reviewer; `reassigned` is set when the hook's `changes`
///   show the user was just added.
/// - `pipeline` hooks for a finished MR pipeline yield a plain event.
///
/// Everything else is `Ok(None)`. A body that is not a webhook payload is
/// an error.
pub fn parse_webhook(body: &str, automation_user_id: u64) -> Result<Option<WebhookEvent>> {
    let payload: Payload = serde_json::from_str(body)
        .map_err(|e| Error::Platform(format!("malformed webhook payload: {e}")))?;

    let parsed = match payload {
        Payload::MergeRequest {
            project,
            object_attributes,
            assignees,
            reviewers,
            changes,
        } => {
            let assigned =
                contains(&assignees, automation_user_id) || contains(&reviewers, automation_user_id);
            assigned.then(|| {
                let reassigned = newly_added(changes.assignees.as_ref(), automation_user_id)
                    || newly_added(changes.reviewers.as_ref(), automation_user_id);
                WebhookEvent {
                    project_id: project.id,
                    project_path: project.path_with_namespace,
                    event: MrEvent {
                        iid: object_attributes.iid,
                        reassigned,
                    },
                }
            })
        }
        Payload::Pipeline {
            project,
            object_attributes,
            merge_request,
        } => {
            let finished = matches!(
                object_attributes.status.as_str(),
                "success" | "failed" | "canceled"
            );
            merge_request
                .filter(|_| finished)
                .map(|mr| WebhookEvent {
                    project_id: project.id,
                    project_path: project.path_with_namespace,
                    event: MrEvent::changed(mr.iid),
                })
        }
        Payload::Other => None,
    };

    Ok(parsed)
}

/// Parse a webhook body and publish it to the governing project's loop.
///
/// Returns the local project key the event went to. Hooks for projects
/// that are not configured are dropped.
pub fn route_webhook(body: &str, config: &Config, hub: &EventHub) -> Result<Option<String>> {
    let Some(hook) = parse_webhook(body, config.gitlab.automation_user_id)? else {
        return Ok(None);
    };

    let Some(project) = config.project_for_gitlab(hook.project_id, hook.project_path.as_deref())
    else {
        debug!(gitlab_project_id = hook.project_id, "webhook for unconfigured project");
        return Ok(None);
    };

    hub.publish(&project.id, hook.event);
    Ok(Some(project.id.clone()))
}
