//! GitLab merge provider implementation

use crate::error::{Error, Result};
use crate::platform::MergeProvider;
use crate::types::{
    CreatedMr, MergeOptions, MergeRequestSnapshot, MergeResult, MrState, Pipeline,
    PipelineStatus,
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retry behaviour for transient GitLab failures
///
/// Only transport errors and 5xx responses are retried, and never for
/// `POST`: a create may have been committed before the failure surfaced.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// GitLab service using reqwest
pub struct GitLabService {
    client: Client,
    token: String,
    base_url: String,
    project: String,
    retry: RetryPolicy,
    rebase_poll_interval: Duration,
    rebase_poll_attempts: u32,
}

#[derive(Deserialize)]
struct UserRef {
    id: u64,
}

#[derive(Deserialize)]
struct PipelineRef {
    id: u64,
    status: String,
    sha: Option<String>,
}

impl From<PipelineRef> for Pipeline {
    fn from(p: PipelineRef) -> Self {
        Self {
            id: p.id,
            status: PipelineStatus::parse(&p.status),
            sha: p.sha,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// MR details as returned by `GET /merge_requests/:iid`
#[derive(Deserialize)]
struct MergeRequestDetails {
    iid: u64,
    title: String,
    source_branch: String,
    target_branch: String,
    state: String, // "opened", "closed", "locked", "merged"
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    work_in_progress: bool,
    #[serde(default)]
    has_conflicts: bool,
    #[serde(default = "default_true")]
    blocking_discussions_resolved: bool,
    #[serde(default)]
    merge_status: String, // "can_be_merged", "cannot_be_merged", "checking", ...
    #[serde(default)]
    assignees: Vec<UserRef>,
    #[serde(default)]
    reviewers: Vec<UserRef>,
    head_pipeline: Option<PipelineRef>,
    pipeline: Option<PipelineRef>,
    sha: Option<String>,
    web_url: String,
}

impl From<MergeRequestDetails> for MergeRequestSnapshot {
    fn from(mr: MergeRequestDetails) -> Self {
        let state = match mr.state.as_str() {
            "opened" | "locked" => MrState::Open,
            "merged" => MrState::Merged,
            _ => MrState::Closed,
        };

        Self {
            iid: mr.iid,
            title: mr.title,
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            state,
            draft: mr.draft || mr.work_in_progress,
            has_conflicts: mr.has_conflicts,
            blocking_discussions_resolved: mr.blocking_discussions_resolved,
            merge_status: mr.merge_status,
            assignee_ids: mr.assignees.into_iter().map(|u| u.id).collect(),
            reviewer_ids: mr.reviewers.into_iter().map(|u| u.id).collect(),
            pipeline: mr.head_pipeline.or(mr.pipeline).map(Into::into),
            sha: mr.sha,
            web_url: mr.web_url,
        }
    }
}

#[derive(Deserialize)]
struct MrListItem {
    iid: u64,
}

#[derive(Deserialize)]
struct RebaseStatus {
    #[serde(default)]
    rebase_in_progress: bool,
    merge_error: Option<String>,
}

#[derive(Deserialize)]
struct CreatedMergeRequest {
    iid: u64,
    web_url: String,
    sha: Option<String>,
}

/// Merge response
#[derive(Deserialize)]
struct MergeResponse {
    state: String,
    merge_commit_sha: Option<String>,
}

#[derive(Serialize)]
struct CreateMrPayload<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    description: &'a str,
    remove_source_branch: bool,
}

#[derive(Serialize)]
struct MergePayload<'a> {
    should_remove_source_branch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merge_commit_message: Option<&'a str>,
}

impl GitLabService {
    /// Create a new GitLab service for one project
    ///
    /// `base_url` is the instance root (e.g. `https://gitlab.com`); the API
    /// path is appended here.
    pub fn new(token: String, base_url: &str, project: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::GitLabApi(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            project,
            retry: RetryPolicy::default(),
            rebase_poll_interval: Duration::from_secs(2),
            rebase_poll_attempts: 60,
        })
    }

    /// Override the retry policy
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override how long `rebase` waits for GitLab to finish
    #[must_use]
    pub const fn with_rebase_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.rebase_poll_interval = interval;
        self.rebase_poll_attempts = attempts;
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    fn encoded_project(&self) -> String {
        urlencoding::encode(&self.project).into_owned()
    }

    fn mr_url(&self, iid: u64, suffix: &str) -> String {
        self.api_url(&format!(
            "/projects/{}/merge_requests/{}{}",
            self.encoded_project(),
            iid,
            suffix
        ))
    }

    /// Send a request, retrying transport errors and 5xx responses of
    /// idempotent methods
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let mut attempt = 1;
        let mut delay = self.retry.base_delay;
        let idempotent = request
            .try_clone()
            .and_then(|r| r.build().ok())
            .is_some_and(|r| *r.method() != Method::POST);

        loop {
            let req = request
                .try_clone()
                .ok_or_else(|| Error::Internal("request body cannot be retried".to_string()))?;
            let outcome = req.header("PRIVATE-TOKEN", &self.token).send().await;

            let retryable = idempotent
                && match &outcome {
                    Ok(response) => response.status().is_server_error(),
                    Err(e) => e.is_timeout() || e.is_connect(),
                };

            if !retryable || attempt >= self.retry.max_attempts {
                return check_status(outcome?).await;
            }

            warn!(attempt, delay_ms = delay.as_millis(), "GitLab request failed, retrying");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.retry.max_delay);
            attempt += 1;
        }
    }

    async fn get_details(&self, iid: u64) -> Result<MergeRequestDetails> {
        Ok(self.send(self.client.get(self.mr_url(iid, ""))).await?.json().await?)
    }

    async fn list_open(&self, role: &str, user_id: u64) -> Result<Vec<MrListItem>> {
        let url = self.api_url(&format!(
            "/projects/{}/merge_requests",
            self.encoded_project()
        ));
        let user = user_id.to_string();
        let request = self.client.get(&url).query(&[
            ("state", "opened"),
            (role, user.as_str()),
            ("per_page", "100"),
        ]);

        Ok(self.send(request).await?.json().await?)
    }

    /// Open MR whose source is `branch`, if any
    async fn find_open_by_source(&self, branch: &str) -> Result<Option<CreatedMergeRequest>> {
        let url = self.api_url(&format!(
            "/projects/{}/merge_requests",
            self.encoded_project()
        ));
        let request = self
            .client
            .get(&url)
            .query(&[("state", "opened"), ("source_branch", branch)]);

        let found: Vec<CreatedMergeRequest> = self.send(request).await?.json().await?;
        Ok(found.into_iter().next())
    }

    async fn update_mr(&self, iid: u64, body: serde_json::Value) -> Result<()> {
        self.send(self.client.put(self.mr_url(iid, "")).json(&body))
            .await?;
        Ok(())
    }
}

/// Turn a non-2xx response into an error carrying GitLab's message
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(Error::GitLabApi(format!("{status} on {url}: {body}")))
}

#[async_trait]
impl MergeProvider for GitLabService {
    fn project_ref(&self) -> &str {
        &self.project
    }

    async fn fetch_mr(&self, iid: u64) -> Result<MergeRequestSnapshot> {
        debug!(mr_iid = iid, "fetching MR");
        let snapshot: MergeRequestSnapshot = self.get_details(iid).await?.into();
        debug!(mr_iid = iid, state = %snapshot.state, "fetched MR");
        Ok(snapshot)
    }

    async fn list_assigned(&self, user_id: u64) -> Result<Vec<u64>> {
        debug!(user_id, "listing assigned MRs");
        let mut iids = BTreeSet::new();
        for role in ["assignee_id", "reviewer_id"] {
            iids.extend(self.list_open(role, user_id).await?.into_iter().map(|mr| mr.iid));
        }
        debug!(count = iids.len(), "listed assigned MRs");
        Ok(iids.into_iter().collect())
    }

    async fn rebase(&self, iid: u64) -> Result<()> {
        debug!(mr_iid = iid, "rebasing MR");
        self.send(self.client.put(self.mr_url(iid, "/rebase")))
            .await?;

        for _ in 0..self.rebase_poll_attempts {
            let status: RebaseStatus = self
                .send(
                    self.client
                        .get(self.mr_url(iid, ""))
                        .query(&[("include_rebase_in_progress", "true")]),
                )
                .await?
                .json()
                .await?;

            if !status.rebase_in_progress {
                return match status.merge_error {
                    Some(err) if !err.is_empty() => Err(Error::GitLabApi(format!(
                        "rebase of !{iid} failed: {err}"
                    ))),
                    _ => {
                        debug!(mr_iid = iid, "rebase complete");
                        Ok(())
                    }
                };
            }
            tokio::time::sleep(self.rebase_poll_interval).await;
        }

        Err(Error::GitLabApi(format!("rebase of !{iid} did not finish in time")))
    }

    async fn merge(&self, iid: u64, options: &MergeOptions) -> Result<MergeResult> {
        debug!(mr_iid = iid, "merging MR");
        let payload = MergePayload {
            should_remove_source_branch: options.remove_source_branch,
            sha: options.sha.as_deref(),
            merge_commit_message: options.commit_message.as_deref(),
        };

        let response: MergeResponse = self
            .send(self.client.put(self.mr_url(iid, "/merge")).json(&payload))
            .await
            .map_err(|e| Error::GitLabApi(format!("Merge failed: {e}")))?
            .json()
            .await?;

        let merge_result = MergeResult {
            merged: response.state == "merged",
            sha: response.merge_commit_sha,
            message: (response.state != "merged")
                .then(|| format!("MR is {} after merge call", response.state)),
        };

        debug!(
            mr_iid = iid,
            merged = merge_result.merged,
            sha = ?merge_result.sha,
            "merge complete"
        );
        Ok(merge_result)
    }

    async fn add_labels(&self, iid: u64, labels: &[String]) -> Result<()> {
        debug!(mr_iid = iid, ?labels, "adding labels");
        self.update_mr(iid, serde_json::json!({ "add_labels": labels.join(",") }))
            .await
    }

    async fn remove_labels(&self, iid: u64, labels: &[String]) -> Result<()> {
        debug!(mr_iid = iid, ?labels, "removing labels");
        self.update_mr(iid, serde_json::json!({ "remove_labels": labels.join(",") }))
            .await
    }

    async fn create_comment(&self, iid: u64, body: &str) -> Result<()> {
        debug!(mr_iid = iid, "creating MR comment");
        self.send(
            self.client
                .post(self.mr_url(iid, "/notes"))
                .json(&serde_json::json!({ "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn create_branch(&self, branch: &str, from_ref: &str) -> Result<()> {
        debug!(branch, from_ref, "creating branch");
        let url = self.api_url(&format!(
            "/projects/{}/repository/branches",
            self.encoded_project()
        ));
        self.send(
            self.client
                .post(&url)
                .query(&[("branch", branch), ("ref", from_ref)]),
        )
        .await?;
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting branch");
        let url = self.api_url(&format!(
            "/projects/{}/repository/branches/{}",
            self.encoded_project(),
            urlencoding::encode(branch)
        ));
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    async fn create_aggregate_mr(
        &self,
        source: &str,
        target: &str,
        title: &str,
        description: &str,
    ) -> Result<CreatedMr> {
        debug!(source, target, "creating aggregate MR");
        let url = self.api_url(&format!(
            "/projects/{}/merge_requests",
            self.encoded_project()
        ));
        let payload = CreateMrPayload {
            source_branch: source,
            target_branch: target,
            title,
            description,
            remove_source_branch: true,
        };

        let created = self.send(self.client.post(&url).json(&payload)).await;
        let mr: CreatedMergeRequest = match created {
            Ok(response) => response.json().await?,
            // The create may have landed before the error; adopt it instead
            // of leaving an orphan behind.
            Err(e) => match self.find_open_by_source(source).await {
                Ok(Some(existing)) => {
                    warn!(
                        mr_iid = existing.iid,
                        error = %e,
                        "adopting aggregate MR created despite error"
                    );
                    existing
                }
                _ => return Err(e),
            },
        };

        debug!(mr_iid = mr.iid, "created aggregate MR");
        Ok(CreatedMr {
            iid: mr.iid,
            web_url: mr.web_url,
            sha: mr.sha,
        })
    }

    async fn close_mr(&self, iid: u64) -> Result<()> {
        debug!(mr_iid = iid, "closing MR");
        self.update_mr(iid, serde_json::json!({ "state_event": "close" }))
            .await
    }

    async fn pipeline_status(&self, iid: u64) -> Result<Option<Pipeline>> {
        let details = self.get_details(iid).await?;
        Ok(details.head_pipeline.or(details.pipeline).map(Into::into))
    }
}
