//! Shared fixtures for the pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pr_monitor::github::{GitHubApi, GitHubError, ListPage, PullListQuery};
use pr_monitor::models::{CheckRunRecord, PrRecord, StateHistoryEntry};
use pr_monitor::store::{Store, StoreError, WriteTx, WriteWork};
use pr_monitor::{NewRepository, ProcessorConfig, SqliteStore, StoredCheckRun, StoredPullRequest, StoredRepository};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const UPDATED_AT: &str = "2024-03-01T12:00:00Z";

/// Scripted responses for one repository.
#[derive(Default, Clone)]
struct RepoScript {
    pulls: Vec<Value>,
    checks: HashMap<String, Vec<Value>>,
    failure: Option<GitHubError>,
}

/// In-memory GitHub double that records how many calls overlap.
pub struct MockGitHub {
    repos: Mutex<HashMap<String, RepoScript>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl MockGitHub {
    pub fn new(latency: Duration) -> Self {
        Self {
            repos: Mutex::new(HashMap::new()),
            latency,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_pulls(&self, full_name: &str, pulls: Vec<Value>) {
        self.script(full_name, |script| script.pulls = pulls);
    }

    pub fn set_checks(&self, full_name: &str, sha: &str, checks: Vec<Value>) {
        self.script(full_name, |script| {
            script.checks.insert(sha.to_string(), checks);
        });
    }

    pub fn fail_repository(&self, full_name: &str, error: GitHubError) {
        self.script(full_name, |script| script.failure = Some(error));
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script(&self, full_name: &str, edit: impl FnOnce(&mut RepoScript)) {
        let mut repos = self.repos.lock().unwrap();
        edit(repos.entry(full_name.to_string()).or_default());
    }

    fn lookup(&self, owner: &str, repo: &str) -> RepoScript {
        self.repos
            .lock()
            .unwrap()
            .get(&format!("{owner}/{repo}"))
            .cloned()
            .unwrap_or_default()
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GitHubApi for MockGitHub {
    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        query: &PullListQuery,
        page: u32,
    ) -> Result<ListPage, GitHubError> {
        self.enter().await;
        let script = self.lookup(owner, repo);
        if let Some(error) = script.failure {
            return Err(error);
        }
        if page > 1 {
            return Ok(ListPage::default());
        }

        let items = script
            .pulls
            .into_iter()
            .filter(|pr| pr["state"] == query.state)
            .collect();
        Ok(ListPage {
            items,
            has_next: false,
        })
    }

    async fn list_check_runs(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
        _per_page: u8,
        page: u32,
    ) -> Result<Value, GitHubError> {
        self.enter().await;
        let script = self.lookup(owner, repo);
        let checks = if page == 1 {
            script.checks.get(commit_sha).cloned().unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(json!({ "total_count": checks.len(), "check_runs": checks }))
    }
}

pub fn pull_request(number: u64, title: &str, head_sha: &str) -> Value {
    json!({
        "number": number,
        "title": title,
        "user": { "login": "octocat" },
        "state": "open",
        "draft": false,
        "base": { "ref": "main", "sha": "base000" },
        "head": { "ref": format!("feature-{number}"), "sha": head_sha },
        "html_url": format!("https://github.com/acme/widgets/pull/{number}"),
        "body": null,
        "labels": [],
        "assignees": [],
        "milestone": null,
        "created_at": "2024-03-01T00:00:00Z",
        "updated_at": UPDATED_AT,
        "closed_at": null,
        "merged_at": null
    })
}

pub fn check_run(id: u64, status: &str, conclusion: Option<&str>) -> Value {
    json!({
        "id": id,
        "name": format!("ci-{id}"),
        "status": status,
        "conclusion": conclusion,
        "check_suite": { "id": 7 },
        "details_url": "https://ci.example.com/run",
        "html_url": format!("https://github.com/acme/widgets/runs/{id}"),
        "output": { "title": null, "summary": null, "text": null },
        "started_at": "2024-03-01T00:00:00Z",
        "completed_at": null
    })
}

/// Configuration tuned for fast, deterministic tests.
pub fn test_config() -> ProcessorConfig {
    ProcessorConfig {
        inter_batch_delay_ms: 0,
        cache_ttl_secs: 0,
        resource_sample_interval_ms: 20,
        ..ProcessorConfig::default()
    }
}

/// Registers `acme/repo-{n}` for every `n` in `1..=count` and returns their ids.
pub async fn seed_repositories(store: &SqliteStore, count: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(count);
    for n in 1..=count {
        let id = store
            .insert_repository(NewRepository::new("acme", format!("repo-{n}")))
            .await
            .unwrap();
        ids.push(id);
    }
    ids
}

/// Store wrapper whose transactions fail on the `fail_on`-th write.
pub struct FailingStore {
    inner: SqliteStore,
    fail_on: usize,
}

impl FailingStore {
    pub fn new(inner: SqliteStore, fail_on: usize) -> Self {
        Self { inner, fail_on }
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn get_repository_by_id(&self, id: i64) -> Result<Option<StoredRepository>, StoreError> {
        self.inner.get_repository_by_id(id).await
    }

    async fn get_active_repositories(&self) -> Result<Vec<StoredRepository>, StoreError> {
        self.inner.get_active_repositories().await
    }

    async fn get_repositories_needing_poll(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredRepository>, StoreError> {
        self.inner.get_repositories_needing_poll(now).await
    }

    async fn get_pr_by_repo_and_number(
        &self,
        repository_id: i64,
        number: u64,
    ) -> Result<Option<StoredPullRequest>, StoreError> {
        self.inner
            .get_pr_by_repo_and_number(repository_id, number)
            .await
    }

    async fn get_check_runs_for_pr(
        &self,
        pull_request_id: i64,
    ) -> Result<Vec<StoredCheckRun>, StoreError> {
        self.inner.get_check_runs_for_pr(pull_request_id).await
    }

    async fn mark_repository_polled(
        &self,
        repository_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.mark_repository_polled(repository_id, at).await
    }

    async fn write_transaction(&self, work: WriteWork) -> Result<usize, StoreError> {
        let fail_on = self.fail_on;
        self.inner
            .write_transaction(Box::new(move |tx| {
                let mut tx = FailingTx {
                    inner: tx,
                    remaining: fail_on,
                };
                work(&mut tx)
            }))
            .await
    }
}

struct FailingTx<'a> {
    inner: &'a mut dyn WriteTx,
    remaining: usize,
}

impl FailingTx<'_> {
    fn tick(&mut self) -> Result<(), StoreError> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            return Err(StoreError::Task("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl WriteTx for FailingTx<'_> {
    fn insert_pull_request(&mut self, repository_id: i64, pr: &PrRecord) -> Result<i64, StoreError> {
        self.tick()?;
        self.inner.insert_pull_request(repository_id, pr)
    }

    fn update_pull_request(&mut self, id: i64, pr: &PrRecord) -> Result<(), StoreError> {
        self.tick()?;
        self.inner.update_pull_request(id, pr)
    }

    fn find_pull_request_id(
        &mut self,
        repository_id: i64,
        number: u64,
    ) -> Result<Option<i64>, StoreError> {
        self.inner.find_pull_request_id(repository_id, number)
    }

    fn insert_check_run(
        &mut self,
        pull_request_id: i64,
        check: &CheckRunRecord,
    ) -> Result<i64, StoreError> {
        self.tick()?;
        self.inner.insert_check_run(pull_request_id, check)
    }

    fn update_check_run(&mut self, id: i64, check: &CheckRunRecord) -> Result<(), StoreError> {
        self.tick()?;
        self.inner.update_check_run(id, check)
    }

    fn append_state_history(&mut self, entry: &StateHistoryEntry) -> Result<(), StoreError> {
        self.tick()?;
        self.inner.append_state_history(entry)
    }
}
