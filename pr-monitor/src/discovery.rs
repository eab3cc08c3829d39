//! Pull request and check run discovery.
//!
//! The engine is a pure producer: it pages through the GitHub collaborator
//! and returns whatever it could parse alongside a list of typed errors.
//! Nothing here touches persistence.

mod cache;
mod payload;

pub use cache::DiscoveryCache;

use crate::github::{GitHubApi, GitHubError, PullListQuery, PER_PAGE};
use crate::models::{CheckRunRecord, PrRecord, PrState, RepositoryContext};
use crate::summary::ProcessingError;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use payload::{parse_check_run, parse_pull_request, unwrap_check_run_envelope};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, info_span, warn, Instrument};

/// Shared limiters for GitHub traffic.
///
/// Both are process-wide: every repository task draws from the same pools.
#[derive(Debug, Clone)]
pub struct DiscoveryLimits {
    api_calls: Arc<Semaphore>,
    check_runs: Arc<Semaphore>,
    check_run_fanout: usize,
}

impl DiscoveryLimits {
    /// Creates limiters for concurrent API calls and check run discoveries.
    pub fn new(max_api_calls: usize, max_check_discoveries: usize) -> Self {
        Self {
            api_calls: Arc::new(Semaphore::new(max_api_calls.max(1))),
            check_runs: Arc::new(Semaphore::new(max_check_discoveries.max(1))),
            check_run_fanout: max_check_discoveries.max(1),
        }
    }
}

/// Check runs grouped by the PR number whose head commit they belong to.
pub type ChecksByPr = HashMap<u64, Vec<CheckRunRecord>>;

/// Fetches current pull request and check run state from GitHub.
#[derive(Clone)]
pub struct DiscoveryEngine {
    github: Arc<dyn GitHubApi>,
    limits: DiscoveryLimits,
    cache: Arc<DiscoveryCache>,
    max_pages: u32,
}

impl DiscoveryEngine {
    pub fn new(
        github: Arc<dyn GitHubApi>,
        limits: DiscoveryLimits,
        cache: Arc<DiscoveryCache>,
        max_pages: u32,
    ) -> Self {
        Self {
            github,
            limits,
            cache,
            max_pages: max_pages.max(1),
        }
    }

    /// Discovers pull requests in the requested states.
    ///
    /// Each GitHub state is listed once, newest-updated first. With `since`,
    /// PRs last updated before the cutoff are excluded and paging stops at
    /// the first one.
    ///
    /// A not-found repository records one error and skips the remaining
    /// states. Any other API error records an error and moves on to the next
    /// state. Malformed payloads are skipped individually.
    ///
    /// # Returns
    ///
    /// The PRs that could be discovered and every error encountered.
    pub async fn discover_prs(
        &self,
        repo: &RepositoryContext,
        states: &[PrState],
        since: Option<DateTime<Utc>>,
    ) -> (Vec<PrRecord>, Vec<ProcessingError>) {
        let span = info_span!("discover_prs", repo = %repo.full_name);

        async {
            let cache_key = DiscoveryCache::pull_requests_key(states, since);
            if let Some(prs) = self.cache.get_pull_requests(repo.id, &cache_key) {
                debug!(count = prs.len(), "Using cached pull requests");
                return (prs, Vec::new());
            }

            let mut prs = Vec::new();
            let mut errors = Vec::new();

            for api_state in api_states(states) {
                let result = self
                    .list_state(repo, api_state, since, &mut prs, &mut errors)
                    .await;

                match result {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        warn!(error = %e, "Repository not found, skipping remaining states");
                        errors.push(
                            ProcessingError::from_github(&e)
                                .with_context("repository", &repo.full_name)
                                .with_context("state", api_state),
                        );
                        break;
                    }
                    Err(e) => {
                        warn!(state = api_state, error = %e, "Failed to list pull requests");
                        errors.push(
                            ProcessingError::from_github(&e)
                                .with_context("repository", &repo.full_name)
                                .with_context("state", api_state),
                        );
                    }
                }
            }

            prs.retain(|pr| states.contains(&pr.state));

            if errors.is_empty() {
                self.cache.insert_pull_requests(repo.id, cache_key, &prs);
            }

            info!(count = prs.len(), errors = errors.len(), "Discovered pull requests");
            (prs, errors)
        }
        .instrument(span)
        .await
    }

    /// Discovers check runs for one commit.
    ///
    /// A missing commit ends discovery for that commit only.
    pub async fn discover_check_runs(
        &self,
        repo: &RepositoryContext,
        commit_sha: &str,
    ) -> (Vec<CheckRunRecord>, Vec<ProcessingError>) {
        let cache_key = DiscoveryCache::check_runs_key(commit_sha);
        if let Some(checks) = self.cache.get_check_runs(repo.id, &cache_key) {
            return (checks, Vec::new());
        }

        let mut checks = Vec::new();
        let mut errors = Vec::new();
        let mut seen: u64 = 0;

        for page in 1..=self.max_pages {
            let envelope = match self.fetch_check_run_page(repo, commit_sha, page).await {
                Ok(envelope) => envelope,
                Err(e) => {
                    if e.is_not_found() {
                        debug!(repo = %repo.full_name, sha = commit_sha, "Commit not found");
                    } else {
                        warn!(repo = %repo.full_name, sha = commit_sha, error = %e, "Failed to list check runs");
                    }
                    errors.push(
                        ProcessingError::from_github(&e)
                            .with_context("repository", &repo.full_name)
                            .with_context("commit", commit_sha),
                    );
                    break;
                }
            };

            let (items, total) = match unwrap_check_run_envelope(envelope) {
                Ok(unwrapped) => unwrapped,
                Err(e) => {
                    errors.push(e.with_context("commit", commit_sha));
                    break;
                }
            };

            let count = items.len();
            for item in items {
                match parse_check_run(item) {
                    Ok(check) => checks.push(check),
                    Err(e) => {
                        warn!(repo = %repo.full_name, error = %e, "Skipping malformed check run");
                        errors.push(e.with_context("commit", commit_sha));
                    }
                }
            }

            seen += count as u64;
            let exhausted = total.is_some_and(|total| seen >= total);
            if count < usize::from(PER_PAGE) || exhausted {
                break;
            }
        }

        if errors.is_empty() {
            self.cache.insert_check_runs(repo.id, cache_key, &checks);
        }

        (checks, errors)
    }

    /// Discovers check runs for the head commit of every open PR.
    ///
    /// Runs concurrently, bounded by the check run limiter.
    pub async fn discover_check_runs_for_prs(
        &self,
        repo: &RepositoryContext,
        prs: &[PrRecord],
    ) -> (ChecksByPr, Vec<ProcessingError>) {
        let targets: Vec<(u64, &str)> = prs
            .iter()
            .filter(|pr| pr.state == PrState::Opened)
            .map(|pr| (pr.number, pr.head_sha.as_str()))
            .collect();

        let outcomes: Vec<(u64, Vec<CheckRunRecord>, Vec<ProcessingError>)> =
            stream::iter(targets)
                .map(|(number, sha)| async move {
                    let _permit = self.limits.check_runs.acquire().await;
                    let (checks, errors) = self.discover_check_runs(repo, sha).await;
                    (number, checks, errors)
                })
                .buffer_unordered(self.limits.check_run_fanout)
                .collect()
                .await;

        let mut by_pr = ChecksByPr::new();
        let mut errors = Vec::new();
        for (number, checks, check_errors) in outcomes {
            errors.extend(
                check_errors
                    .into_iter()
                    .map(|e| e.with_context("pr_number", number)),
            );
            by_pr.insert(number, checks);
        }

        debug!(
            repo = %repo.full_name,
            prs = by_pr.len(),
            checks = by_pr.values().map(Vec::len).sum::<usize>(),
            "Discovered check runs"
        );
        (by_pr, errors)
    }

    /// Returns the shared discovery cache.
    pub fn cache(&self) -> &Arc<DiscoveryCache> {
        &self.cache
    }

    /// Pages through one GitHub state, appending parsed PRs.
    ///
    /// Pages fetched before a failure are kept.
    async fn list_state(
        &self,
        repo: &RepositoryContext,
        api_state: &'static str,
        since: Option<DateTime<Utc>>,
        prs: &mut Vec<PrRecord>,
        errors: &mut Vec<ProcessingError>,
    ) -> Result<(), GitHubError> {
        let query = PullListQuery {
            state: api_state,
            per_page: PER_PAGE,
        };

        for page in 1..=self.max_pages {
            let listing = {
                let _permit = self.acquire_api().await?;
                self.github
                    .list_pull_requests(&repo.owner, &repo.name, &query, page)
                    .await?
            };

            let mut passed_cutoff = false;
            for item in listing.items {
                match parse_pull_request(item) {
                    Ok(pr) if since.is_some_and(|since| pr.updated_at < since) => {
                        passed_cutoff = true;
                    }
                    Ok(pr) => prs.push(pr),
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed pull request");
                        errors.push(e.with_context("repository", &repo.full_name));
                    }
                }
            }

            if passed_cutoff || !listing.has_next {
                return Ok(());
            }
        }

        warn!(
            state = api_state,
            max_pages = self.max_pages,
            "Reached page limit while listing pull requests"
        );
        Ok(())
    }

    async fn fetch_check_run_page(
        &self,
        repo: &RepositoryContext,
        commit_sha: &str,
        page: u32,
    ) -> Result<serde_json::Value, GitHubError> {
        let _permit = self.acquire_api().await?;
        self.github
            .list_check_runs(&repo.owner, &repo.name, commit_sha, PER_PAGE, page)
            .await
    }

    async fn acquire_api(&self) -> Result<SemaphorePermit<'_>, GitHubError> {
        self.limits
            .api_calls
            .acquire()
            .await
            .map_err(|_| GitHubError::Api {
                message: "API call limiter closed".to_string(),
            })
    }
}

/// Maps requested PR states onto GitHub state filters, each listed once.
pub(crate) fn api_states(states: &[PrState]) -> Vec<&'static str> {
    let mut api_states: Vec<&'static str> = Vec::new();
    for state in states {
        let api_state = state.api_state();
        if !api_states.contains(&api_state) {
            api_states.push(api_state);
        }
    }
    api_states
}
