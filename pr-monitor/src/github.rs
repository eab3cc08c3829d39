//! GitHub collaborator.
//!
//! The discovery engine only sees the [`GitHubApi`] trait: paginated list
//! operations returning raw JSON payloads, and a [`GitHubError`] that keeps
//! "not found" distinct from every other API failure. [`OctocrabApi`] is the
//! production implementation.

mod error;
mod octocrab_api;

pub use error::GitHubError;
pub use octocrab_api::OctocrabApi;

use async_trait::async_trait;

/// Items requested per page.
pub const PER_PAGE: u8 = 100;

/// Query parameters for one pull request listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PullListQuery {
    /// GitHub state filter ("open" or "closed").
    pub state: &'static str,

    /// Page size.
    pub per_page: u8,
}

/// One page of raw list results.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Raw item payloads, newest-updated first.
    pub items: Vec<serde_json::Value>,

    /// Whether another page may follow.
    pub has_next: bool,
}

/// Paginated read access to GitHub.
///
/// Implementations own per-call timeouts and rate limiting; callers never
/// issue raw HTTP.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Lists one page of pull requests sorted by last update, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`GitHubError::NotFound`] if the repository does not exist.
    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        query: &PullListQuery,
        page: u32,
    ) -> Result<ListPage, GitHubError>;

    /// Lists one page of check runs for a commit.
    ///
    /// Returns the raw envelope object (`{"total_count": .., "check_runs": [..]}`).
    ///
    /// # Errors
    ///
    /// Returns [`GitHubError::NotFound`] if the commit does not exist.
    async fn list_check_runs(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
        per_page: u8,
        page: u32,
    ) -> Result<serde_json::Value, GitHubError>;
}
