//! GitHub collaborator error types.

use thiserror::Error;

/// Errors raised by a [`GitHubApi`](super::GitHubApi) implementation.
#[derive(Debug, Clone, Error)]
pub enum GitHubError {
    /// The repository, commit or pull request does not exist.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Secondary or primary rate limit hit.
    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    /// Any other API failure.
    #[error("GitHub API error: {message}")]
    Api { message: String },
}

impl GitHubError {
    /// Classifies an octocrab error for the given resource.
    pub(crate) fn from_octocrab(error: octocrab::Error, resource: &str) -> Self {
        if let octocrab::Error::GitHub { source, .. } = &error {
            match source.status_code.as_u16() {
                404 => {
                    return Self::NotFound {
                        resource: resource.to_string(),
                    }
                }
                429 => {
                    return Self::RateLimited {
                        message: source.message.clone(),
                    }
                }
                _ => {}
            }
        }

        Self::Api {
            message: error.to_string(),
        }
    }

    /// Returns true for [`GitHubError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
