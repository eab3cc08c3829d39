//! Repository records and the per-session processing context.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Default polling interval for newly registered repositories.
const DEFAULT_POLLING_INTERVAL_MINUTES: u32 = 15;

/// A watched repository as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRepository {
    /// Database identifier.
    pub id: i64,

    /// Repository owner (user or organization).
    pub owner: String,

    /// Repository name.
    pub name: String,

    /// Whether the repository is currently monitored.
    pub is_active: bool,

    /// Minimum time between two polls.
    pub polling_interval_minutes: u32,

    /// Operator-assigned processing priority (higher first).
    pub priority: i32,

    /// When the repository was last polled successfully.
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl StoredRepository {
    /// Full repository name in "owner/name" format.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Returns true if the repository is active and its polling interval elapsed.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }

        match self.last_polled_at {
            None => true,
            Some(at) => {
                at + Duration::minutes(i64::from(self.polling_interval_minutes)) <= now
            }
        }
    }

    /// Builds the processing context used for one session.
    #[must_use]
    pub fn context(&self) -> RepositoryContext {
        RepositoryContext {
            id: self.id,
            owner: self.owner.clone(),
            name: self.name.clone(),
            full_name: self.full_name(),
            last_updated_at: self.last_polled_at,
            priority: self.priority,
        }
    }
}

/// Sorts repositories so the most urgent poll comes first.
///
/// Higher priority wins, then never-polled repositories, then the oldest poll.
pub fn sort_by_poll_priority(repositories: &mut [StoredRepository]) {
    repositories.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| match (a.last_polled_at, b.last_polled_at) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(&y),
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Attributes for registering a new repository.
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub owner: String,
    pub name: String,
    pub is_active: bool,
    pub polling_interval_minutes: u32,
    pub priority: i32,
}

impl NewRepository {
    /// Creates an active repository with the default polling interval.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            is_active: true,
            polling_interval_minutes: DEFAULT_POLLING_INTERVAL_MINUTES,
            priority: 0,
        }
    }

    /// Sets the polling interval.
    pub fn with_polling_interval(mut self, minutes: u32) -> Self {
        self.polling_interval_minutes = minutes;
        self
    }

    /// Sets the processing priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the repository inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Per-session view of a repository.
///
/// Created when a session selects the repository and discarded afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryContext {
    /// Database identifier.
    pub id: i64,

    /// Repository owner.
    pub owner: String,

    /// Repository name.
    pub name: String,

    /// Full repository name in "owner/name" format.
    pub full_name: String,

    /// Last time the repository state was synchronized.
    pub last_updated_at: Option<DateTime<Utc>>,

    /// Processing priority.
    pub priority: i32,
}
