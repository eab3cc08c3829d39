//! Pull request records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    /// Open for review.
    Opened,
    /// Closed without merging.
    Closed,
    /// Closed by merging.
    Merged,
}

impl PrState {
    /// Returns the persisted name of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Closed => "closed",
            Self::Merged => "merged",
        }
    }

    /// Parses a persisted state name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "opened" | "open" => Some(Self::Opened),
            "closed" => Some(Self::Closed),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }

    /// The `state` query value GitHub uses for this state.
    #[must_use]
    pub fn api_state(&self) -> &'static str {
        match self {
            Self::Opened => "open",
            Self::Closed | Self::Merged => "closed",
        }
    }

    /// Returns true for closed and merged pull requests.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Merged)
    }
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a pull request from one discovery pass.
///
/// Never persisted directly; the synchronizer writes it through the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrRecord {
    /// Repository-scoped PR number.
    pub number: u64,

    /// PR title.
    pub title: String,

    /// Author login.
    pub author: String,

    /// Normalized state (closed with a merge timestamp becomes merged).
    pub state: PrState,

    /// Whether the PR is a draft.
    pub draft: bool,

    /// Base branch name.
    pub base_branch: String,

    /// Base commit SHA.
    pub base_sha: String,

    /// Head branch name.
    pub head_branch: String,

    /// Head commit SHA.
    pub head_sha: String,

    /// Browser URL.
    pub url: String,

    /// PR description.
    pub body: Option<String>,

    /// Label names.
    pub labels: Vec<String>,

    /// Assignee logins.
    pub assignees: Vec<String>,

    /// Milestone title.
    pub milestone: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,

    /// Original API payload.
    #[serde(skip)]
    pub raw_metadata: serde_json::Value,
}

/// A pull request row as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPullRequest {
    pub id: i64,
    pub repository_id: i64,
    pub number: u64,
    pub title: String,
    pub author: String,
    pub state: PrState,
    pub draft: bool,
    pub base_branch: String,
    pub base_sha: String,
    pub head_branch: String,
    pub head_sha: String,
    pub url: String,
    pub body: Option<String>,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub milestone: Option<String>,
    pub created_at: DateTime<Utc>,
    /// GitHub `updated_at` at the time of the last synchronization.
    pub last_updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_state_names() {
        assert_eq!(PrState::from_name("opened"), Some(PrState::Opened));
        assert_eq!(PrState::from_name("open"), Some(PrState::Opened));
        assert_eq!(PrState::from_name("merged"), Some(PrState::Merged));
        assert_eq!(PrState::from_name("draft"), None);
    }

    #[test]
    fn maps_to_api_state() {
        assert_eq!(PrState::Opened.api_state(), "open");
        assert_eq!(PrState::Closed.api_state(), "closed");
        assert_eq!(PrState::Merged.api_state(), "closed");
    }

    #[test]
    fn terminal_states() {
        assert!(!PrState::Opened.is_terminal());
        assert!(PrState::Closed.is_terminal());
        assert!(PrState::Merged.is_terminal());
    }
}
