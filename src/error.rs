//! Error types for merge-assist

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by merge-assist
#[derive(Debug, Error)]
pub enum Error {
    /// GitLab rejected or failed an API call
    #[error("GitLab API error: {0}")]
    GitLabApi(String),

    /// Generic merge provider failure
    #[error("platform error: {0}")]
    Platform(String),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure
    #[error("migration error: {0}")]
    Migration(String),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or unusable credentials
    #[error("authentication error: {0}")]
    Auth(String),

    /// Requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A state invariant was violated
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is worth re-observing on the next cycle.
    ///
    /// Transient failures never count against an MR.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || is_server_error(e),
            Self::GitLabApi(_) | Self::Platform(_) => true,
            _ => false,
        }
    }

    /// Whether the failure should stop the owning project loop.
    ///
    /// The supervisor restarts loops that end with a fatal error.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Invariant(_) | Self::Database(_) | Self::Migration(_)
        )
    }
}

fn is_server_error(e: &reqwest::Error) -> bool {
    e.status().is_some_and(|s| s.is_server_error())
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
