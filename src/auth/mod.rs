//! Authentication for GitLab
//!
//! The token is read from the environment; credential storage is left to
//! whatever deploys the service.

use crate::error::{Error, Result};
use std::env;

/// Environment variables checked for a token, in order
pub const TOKEN_ENV_VARS: [&str; 2] = ["GITLAB_TOKEN", "GL_TOKEN"];

/// Source of authentication token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    /// Token from environment variable
    EnvVar,
}

/// Resolved GitLab credentials
#[derive(Debug, Clone)]
pub struct GitLabAuthConfig {
    /// Personal or project access token
    pub token: String,
    /// Where the token came from
    pub source: AuthSource,
}

/// Resolve the GitLab token.
pub fn get_gitlab_auth() -> Result<GitLabAuthConfig> {
    for var in TOKEN_ENV_VARS {
        if let Ok(token) = env::var(var) {
            let token = token.trim().to_string();
            if !token.is_empty() {
                return Ok(GitLabAuthConfig {
                    token,
                    source: AuthSource::EnvVar,
                });
            }
        }
    }

    Err(Error::Auth(format!(
        "no GitLab token found; set {}",
        TOKEN_ENV_VARS.join(" or ")
    )))
}
