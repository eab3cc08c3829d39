//! Short-lived cache of discovery results.
//!
//! Entries are keyed by repository id and query parameters. TTL expiry and
//! explicit invalidation are the only ways entries leave the cache. Expired
//! entries are swept on every insert, so keys that are never looked up again
//! (a new `since` cutoff, a new head SHA) do not accumulate.

use crate::models::{CheckRunRecord, PrRecord, PrState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
enum CachedValue {
    PullRequests(Vec<PrRecord>),
    CheckRuns(Vec<CheckRunRecord>),
}

#[derive(Debug)]
struct CacheEntry {
    stored_at: Instant,
    value: CachedValue,
}

/// TTL cache for pull request and check run listings.
#[derive(Debug)]
pub struct DiscoveryCache {
    ttl: Duration,
    entries: Mutex<HashMap<(i64, String), CacheEntry>>,
}

impl DiscoveryCache {
    /// Creates a cache whose entries live for `ttl`. A zero TTL disables caching.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Key for a pull request listing.
    #[must_use]
    pub fn pull_requests_key(states: &[PrState], since: Option<DateTime<Utc>>) -> String {
        let states: Vec<&str> = states.iter().map(PrState::as_str).collect();
        let since = since.map(|s| s.to_rfc3339()).unwrap_or_default();
        format!("pulls?states={}&since={since}", states.join(","))
    }

    /// Key for a check run listing.
    #[must_use]
    pub fn check_runs_key(commit_sha: &str) -> String {
        format!("check-runs?sha={commit_sha}")
    }

    pub fn get_pull_requests(&self, repository_id: i64, key: &str) -> Option<Vec<PrRecord>> {
        match self.get(repository_id, key)? {
            CachedValue::PullRequests(prs) => Some(prs),
            CachedValue::CheckRuns(_) => None,
        }
    }

    pub fn insert_pull_requests(&self, repository_id: i64, key: String, prs: &[PrRecord]) {
        self.insert(repository_id, key, CachedValue::PullRequests(prs.to_vec()));
    }

    pub fn get_check_runs(&self, repository_id: i64, key: &str) -> Option<Vec<CheckRunRecord>> {
        match self.get(repository_id, key)? {
            CachedValue::CheckRuns(checks) => Some(checks),
            CachedValue::PullRequests(_) => None,
        }
    }

    pub fn insert_check_runs(&self, repository_id: i64, key: String, checks: &[CheckRunRecord]) {
        self.insert(repository_id, key, CachedValue::CheckRuns(checks.to_vec()));
    }

    /// Drops every entry for one repository, returning how many were removed.
    pub fn invalidate_repository(&self, repository_id: i64) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(repo, _), _| *repo != repository_id);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(repository_id, removed, "Invalidated discovery cache");
        }
        removed
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including ones not yet found expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, repository_id: i64, key: &str) -> Option<CachedValue> {
        if !self.is_enabled() {
            return None;
        }

        let mut entries = self.lock();
        let cache_key = (repository_id, key.to_string());
        let expired = match entries.get(&cache_key) {
            None => return None,
            Some(entry) => entry.stored_at.elapsed() >= self.ttl,
        };

        if expired {
            entries.remove(&cache_key);
            return None;
        }

        entries.get(&cache_key).map(|entry| entry.value.clone())
    }

    fn insert(&self, repository_id: i64, key: String, value: CachedValue) {
        if !self.is_enabled() {
            return;
        }

        let ttl = self.ttl;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        let swept = before - entries.len();
        if swept > 0 {
            debug!(swept, "Swept expired discovery cache entries");
        }

        entries.insert(
            (repository_id, key),
            CacheEntry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(i64, String), CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
