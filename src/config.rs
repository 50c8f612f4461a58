//! Configuration file handling
//!
//! Configuration lives in a TOML file. Each `[[projects]]` entry becomes a
//! [`ProjectSettings`] value that is handed to that project's loop.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration filename
pub const DEFAULT_CONFIG_FILE: &str = "merge-assist.toml";

const DEFAULT_BATCH_SIZE: usize = 5;
const DEFAULT_REJECTION_THRESHOLD: u32 = 3;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const MAX_PIPELINE_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: PathBuf,
    /// GitLab connection
    pub gitlab: GitLabConfig,
    /// Governed projects
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// GitLab connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabConfig {
    /// Base URL, e.g. `https://gitlab.com`
    #[serde(default = "default_gitlab_url")]
    pub url: String,
    /// User ID of the automation identity
    pub automation_user_id: u64,
}

/// Per-project configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Local project key
    pub id: String,
    /// Numeric project ID or `group/project` path on GitLab
    pub gitlab_project: String,
    /// Allowed target branches (empty = any)
    #[serde(default)]
    pub target_branches: Vec<String>,
    /// Ready MRs required before a batch is formed
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Consecutive not-ready cycles before rejection
    #[serde(default = "default_rejection_threshold")]
    pub rejection_threshold: u32,
    /// Seconds between pipeline status polls
    #[serde(default = "default_poll_interval")]
    pub pipeline_poll_interval_secs: u64,
    /// Seconds before a pipeline wait gives up
    #[serde(default = "default_pipeline_timeout")]
    pub pipeline_timeout_secs: u64,
    /// Seconds between periodic sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Label overrides
    #[serde(default)]
    pub labels: LabelConfig,
}

/// Label names applied to MRs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Seen by merge-assist
    pub recognized: String,
    /// Failed readiness
    pub not_ready: String,
    /// Rejected after too many strikes
    pub rejected: String,
    /// Passed readiness
    pub ready_to_merge: String,
    /// Aggregate batch MR
    pub batch_mr: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            recognized: "Merge Assist: Recognised for Merge".to_string(),
            not_ready: "Merge Assist: Not Ready for Merge".to_string(),
            rejected: "Merge Assist: Rejected".to_string(),
            ready_to_merge: "Merge Assist: Ready to Merge".to_string(),
            batch_mr: "Merge Assist: Batch Merge Request".to_string(),
        }
    }
}

impl LabelConfig {
    /// Labels removed once an MR is merged
    pub fn transient(&self) -> Vec<String> {
        vec![
            self.recognized.clone(),
            self.ready_to_merge.clone(),
            self.not_ready.clone(),
        ]
    }
}

/// Runtime settings for one project loop
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    /// Local project key
    pub project: String,
    /// Automation identity
    pub automation_user_id: u64,
    /// Allowed target branches (empty = any)
    pub target_branches: Vec<String>,
    /// Ready MRs required before a batch is formed
    pub batch_size: usize,
    /// Consecutive not-ready cycles before rejection
    pub rejection_threshold: u32,
    /// Pipeline poll interval
    pub poll_interval: Duration,
    /// Pipeline wait limit
    pub pipeline_timeout: Duration,
    /// Periodic sweep interval
    pub sweep_interval: Duration,
    /// Label names
    pub labels: LabelConfig,
}

impl ProjectSettings {
    /// Settings with every default, for `project`
    pub fn new(project: impl Into<String>, automation_user_id: u64) -> Self {
        Self {
            project: project.into(),
            automation_user_id,
            target_branches: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            rejection_threshold: DEFAULT_REJECTION_THRESHOLD,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            pipeline_timeout: Duration::from_secs(DEFAULT_PIPELINE_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            labels: LabelConfig::default(),
        }
    }

    /// Whether MRs targeting `branch` are governed
    pub fn allows_branch(&self, branch: &str) -> bool {
        self.target_branches.is_empty() || self.target_branches.iter().any(|b| b == branch)
    }
}

fn default_database() -> PathBuf {
    PathBuf::from("merge-assist.db")
}

fn default_gitlab_url() -> String {
    "https://gitlab.com".to_string()
}

const fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

const fn default_rejection_threshold() -> u32 {
    DEFAULT_REJECTION_THRESHOLD
}

const fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

const fn default_pipeline_timeout() -> u64 {
    DEFAULT_PIPELINE_TIMEOUT_SECS
}

const fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

impl Config {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.projects.is_empty() {
            return Err(Error::Config("no [[projects]] configured".to_string()));
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            if !seen.insert(project.id.as_str()) {
                return Err(Error::Config(format!("duplicate project id '{}'", project.id)));
            }
            project.validate()?;
        }
        Ok(())
    }

    /// Look up a project by its local key
    pub fn project(&self, id: &str) -> Result<&ProjectConfig> {
        self.projects
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::Config(format!("unknown project '{id}'")))
    }

    /// Project whose `gitlab_project` names GitLab project `id`, either
    /// numerically or by its `group/project` path
    pub fn project_for_gitlab(&self, id: u64, path: Option<&str>) -> Option<&ProjectConfig> {
        let numeric = id.to_string();
        self.projects.iter().find(|p| {
            p.gitlab_project == numeric || path.is_some_and(|path| p.gitlab_project == path)
        })
    }
}

impl ProjectConfig {
    fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(format!("project '{}': {msg}", self.id)));

        if self.gitlab_project.trim().is_empty() {
            return fail("gitlab_project must not be empty");
        }
        if self.rejection_threshold == 0 {
            return fail("rejection_threshold must be at least 1");
        }
        if self.pipeline_poll_interval_secs == 0 || self.pipeline_timeout_secs == 0 {
            return fail("pipeline intervals must be non-zero");
        }
        if self.pipeline_timeout_secs > MAX_PIPELINE_TIMEOUT_SECS {
            return fail("pipeline_timeout_secs exceeds one week");
        }
        if self.pipeline_poll_interval_secs > self.pipeline_timeout_secs {
            return fail("pipeline_poll_interval_secs exceeds pipeline_timeout_secs");
        }
        if self.sweep_interval_secs == 0 {
            return fail("sweep_interval_secs must be non-zero");
        }
        Ok(())
    }

    /// Runtime settings for this project's loop
    pub fn settings(&self, automation_user_id: u64) -> ProjectSettings {
        ProjectSettings {
            project: self.id.clone(),
            automation_user_id,
            target_branches: self.target_branches.clone(),
            batch_size: self.batch_size,
            rejection_threshold: self.rejection_threshold,
            poll_interval: Duration::from_secs(self.pipeline_poll_interval_secs),
            pipeline_timeout: Duration::from_secs(self.pipeline_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            labels: self.labels.clone(),
        }
    }
}

/// Load and validate configuration from disk.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    Config::from_toml(&content).map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
        other => other,
    })
}
