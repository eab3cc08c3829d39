//! State history rows appended by the synchronizer.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of record a history entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySubject {
    PullRequest,
    CheckRun,
}

impl HistorySubject {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequest => "pull_request",
            Self::CheckRun => "check_run",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pull_request" => Some(Self::PullRequest),
            "check_run" => Some(Self::CheckRun),
            _ => None,
        }
    }
}

/// One recorded transition (PR state or check run conclusion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateHistoryEntry {
    pub subject: HistorySubject,

    /// Database id of the pull request or check run row.
    pub subject_id: i64,

    /// Previous value; `None` when the record was created.
    pub old_value: Option<String>,

    pub new_value: String,

    /// Event type that caused the transition (e.g., "pr_state_changed").
    pub trigger: String,

    pub recorded_at: DateTime<Utc>,
}
