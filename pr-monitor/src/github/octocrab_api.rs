//! Octocrab-backed GitHub collaborator.

use super::{GitHubApi, GitHubError, ListPage, PullListQuery};
use crate::rate_limit::ensure_core_rate_limit;
use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Requests between two core rate limit checks.
const RATE_LIMIT_CHECK_EVERY: u32 = 20;

#[derive(Serialize)]
struct PullListParams<'a> {
    state: &'a str,
    sort: &'a str,
    direction: &'a str,
    per_page: u8,
    page: u32,
}

#[derive(Serialize)]
struct PageParams {
    per_page: u8,
    page: u32,
}

/// Direct GitHub API client using octocrab.
#[derive(Debug)]
pub struct OctocrabApi {
    octocrab: Octocrab,
    requests: AtomicU32,
}

impl OctocrabApi {
    /// Wraps an existing octocrab instance.
    pub fn new(octocrab: Octocrab) -> Self {
        Self {
            octocrab,
            requests: AtomicU32::new(0),
        }
    }

    /// Builds a client authenticated with a personal access token.
    ///
    /// # Errors
    ///
    /// Returns [`GitHubError::Api`] if the client cannot be built.
    pub fn from_token(token: String) -> Result<Self, GitHubError> {
        let octocrab = Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| GitHubError::Api {
                message: e.to_string(),
            })?;
        Ok(Self::new(octocrab))
    }

    /// Checks the core quota every few requests and waits when it runs low.
    async fn throttle(&self) {
        let count = self.requests.fetch_add(1, Ordering::Relaxed);
        if count % RATE_LIMIT_CHECK_EVERY != 0 {
            return;
        }

        if let Err(e) = ensure_core_rate_limit(&self.octocrab).await {
            warn!(error = %e, "Failed to check rate limit, continuing");
        }
    }
}

#[async_trait]
impl GitHubApi for OctocrabApi {
    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        query: &PullListQuery,
        page: u32,
    ) -> Result<ListPage, GitHubError> {
        self.throttle().await;

        let route = format!("/repos/{owner}/{repo}/pulls");
        let params = PullListParams {
            state: query.state,
            sort: "updated",
            direction: "desc",
            per_page: query.per_page,
            page,
        };
        debug!(repo = %format!("{owner}/{repo}"), state = query.state, page, "Listing pull requests");

        let items: Vec<serde_json::Value> = self
            .octocrab
            .get(&route, Some(&params))
            .await
            .map_err(|e| GitHubError::from_octocrab(e, &format!("{owner}/{repo}")))?;

        let has_next = items.len() >= usize::from(query.per_page);
        Ok(ListPage { items, has_next })
    }

    async fn list_check_runs(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
        per_page: u8,
        page: u32,
    ) -> Result<serde_json::Value, GitHubError> {
        self.throttle().await;

        let route = format!("/repos/{owner}/{repo}/commits/{commit_sha}/check-runs");
        let params = PageParams { per_page, page };
        debug!(repo = %format!("{owner}/{repo}"), sha = commit_sha, page, "Listing check runs");

        self.octocrab
            .get(&route, Some(&params))
            .await
            .map_err(|e| GitHubError::from_octocrab(e, &format!("{owner}/{repo}@{commit_sha}")))
    }
}
