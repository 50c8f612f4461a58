//! Shared command context for CLI commands
//!
//! Extracts the setup shared by run, check, status and priority.

use merge_assist::auth::get_gitlab_auth;
use merge_assist::config::{Config, ProjectConfig, ProjectSettings, load_config};
use merge_assist::error::Result;
use merge_assist::platform::{GitLabService, MergeProvider};
use merge_assist::store::Store;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Shared context for CLI commands
///
/// Holds the validated configuration. The database and the GitLab client
/// are opened on demand since not every command needs both.
pub struct CommandContext {
    /// Validated configuration
    pub config: Config,
}

impl CommandContext {
    /// Load and validate the configuration file
    pub fn new(config_path: &Path) -> Result<Self> {
        let config = load_config(config_path)?;
        debug!(path = %config_path.display(), projects = config.projects.len(), "loaded config");
        Ok(Self { config })
    }

    /// Open (and migrate) the configured database
    pub async fn open_store(&self) -> Result<Store> {
        Store::open(&self.config.database).await
    }

    /// Look up a project by its local key
    pub fn project(&self, id: &str) -> Result<&ProjectConfig> {
        self.config.project(id)
    }

    /// Runtime settings for a project
    pub fn settings(&self, project: &ProjectConfig) -> ProjectSettings {
        project.settings(self.config.gitlab.automation_user_id)
    }

    /// GitLab client for a project, authenticated from the environment
    pub fn provider(&self, project: &ProjectConfig) -> Result<Arc<dyn MergeProvider>> {
        let auth = get_gitlab_auth()?;
        let service = GitLabService::new(
            auth.token,
            &self.config.gitlab.url,
            project.gitlab_project.clone(),
        )?;
        Ok(Arc::new(service))
    }
}
