//! Change events and the comparable snapshots they are built from.

use super::severity::Severity;
use crate::models::{
    CheckConclusion, CheckRunRecord, CheckStatus, PrRecord, PrState, StoredCheckRun,
    StoredPullRequest,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Kind of a detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PrCreated,
    PrUpdated,
    PrStateChanged,
    CheckRunCreated,
    CheckRunUpdated,
    CheckRunStatusChanged,
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrCreated => "pr_created",
            Self::PrUpdated => "pr_updated",
            Self::PrStateChanged => "pr_state_changed",
            Self::CheckRunCreated => "check_run_created",
            Self::CheckRunUpdated => "check_run_updated",
            Self::CheckRunStatusChanged => "check_run_status_changed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pull request attributes compared between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrField {
    /// Marker for a PR seen for the first time.
    Created,
    Title,
    State,
    Draft,
    HeadSha,
    BaseSha,
    Body,
    Author,
    LastUpdatedAt,
}

impl PrField {
    /// Fields diffed on every update, in reporting order.
    pub const COMPARED: [PrField; 8] = [
        PrField::Title,
        PrField::State,
        PrField::Draft,
        PrField::HeadSha,
        PrField::BaseSha,
        PrField::Body,
        PrField::Author,
        PrField::LastUpdatedAt,
    ];
}

/// Check run attributes compared between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunField {
    /// Marker for a check run seen for the first time.
    Created,
    Status,
    Conclusion,
    OutputSummary,
    OutputText,
    StartedAt,
    CompletedAt,
    DetailsUrl,
    LogsUrl,
}

impl CheckRunField {
    /// Fields diffed on every update, in reporting order.
    pub const COMPARED: [CheckRunField; 8] = [
        CheckRunField::Status,
        CheckRunField::Conclusion,
        CheckRunField::OutputSummary,
        CheckRunField::OutputText,
        CheckRunField::StartedAt,
        CheckRunField::CompletedAt,
        CheckRunField::DetailsUrl,
        CheckRunField::LogsUrl,
    ];
}

/// A field of either record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ChangedField {
    Pr(PrField),
    CheckRun(CheckRunField),
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Absent,
    Text(String),
    Flag(bool),
    Time(DateTime<Utc>),
    PrState(PrState),
    Status(CheckStatus),
    Conclusion(CheckConclusion),
}

impl FieldValue {
    fn text(value: Option<&String>) -> Self {
        value.map_or(Self::Absent, |v| Self::Text(v.clone()))
    }

    fn time(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(Self::Absent, Self::Time)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("none"),
            Self::Text(text) => f.write_str(text),
            Self::Flag(flag) => write!(f, "{flag}"),
            Self::Time(time) => f.write_str(&time.to_rfc3339()),
            Self::PrState(state) => write!(f, "{state}"),
            Self::Status(status) => write!(f, "{status}"),
            Self::Conclusion(conclusion) => write!(f, "{conclusion}"),
        }
    }
}

/// One attribute that differs between the stored and the fresh record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    pub field: ChangedField,
    pub old: FieldValue,
    pub new: FieldValue,
}

/// The comparable attributes of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrSnapshot {
    pub title: String,
    pub state: PrState,
    pub draft: bool,
    pub head_sha: String,
    pub base_sha: String,
    pub body: Option<String>,
    pub author: String,
    pub last_updated_at: DateTime<Utc>,
}

impl PrSnapshot {
    #[must_use]
    pub fn value(&self, field: PrField) -> FieldValue {
        match field {
            PrField::Created => FieldValue::Absent,
            PrField::Title => FieldValue::Text(self.title.clone()),
            PrField::State => FieldValue::PrState(self.state),
            PrField::Draft => FieldValue::Flag(self.draft),
            PrField::HeadSha => FieldValue::Text(self.head_sha.clone()),
            PrField::BaseSha => FieldValue::Text(self.base_sha.clone()),
            PrField::Body => FieldValue::text(self.body.as_ref()),
            PrField::Author => FieldValue::Text(self.author.clone()),
            PrField::LastUpdatedAt => FieldValue::Time(self.last_updated_at),
        }
    }
}

impl From<&PrRecord> for PrSnapshot {
    fn from(pr: &PrRecord) -> Self {
        Self {
            title: pr.title.clone(),
            state: pr.state,
            draft: pr.draft,
            head_sha: pr.head_sha.clone(),
            base_sha: pr.base_sha.clone(),
            body: pr.body.clone(),
            author: pr.author.clone(),
            last_updated_at: pr.updated_at,
        }
    }
}

impl From<&StoredPullRequest> for PrSnapshot {
    fn from(pr: &StoredPullRequest) -> Self {
        Self {
            title: pr.title.clone(),
            state: pr.state,
            draft: pr.draft,
            head_sha: pr.head_sha.clone(),
            base_sha: pr.base_sha.clone(),
            body: pr.body.clone(),
            author: pr.author.clone(),
            last_updated_at: pr.last_updated_at,
        }
    }
}

/// The comparable attributes of a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRunSnapshot {
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub output_summary: Option<String>,
    pub output_text: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub details_url: Option<String>,
    pub logs_url: Option<String>,
}

impl CheckRunSnapshot {
    #[must_use]
    pub fn value(&self, field: CheckRunField) -> FieldValue {
        match field {
            CheckRunField::Created => FieldValue::Absent,
            CheckRunField::Status => FieldValue::Status(self.status),
            CheckRunField::Conclusion => self
                .conclusion
                .map_or(FieldValue::Absent, FieldValue::Conclusion),
            CheckRunField::OutputSummary => FieldValue::text(self.output_summary.as_ref()),
            CheckRunField::OutputText => FieldValue::text(self.output_text.as_ref()),
            CheckRunField::StartedAt => FieldValue::time(self.started_at),
            CheckRunField::CompletedAt => FieldValue::time(self.completed_at),
            CheckRunField::DetailsUrl => FieldValue::text(self.details_url.as_ref()),
            CheckRunField::LogsUrl => FieldValue::text(self.logs_url.as_ref()),
        }
    }
}

impl From<&CheckRunRecord> for CheckRunSnapshot {
    fn from(check: &CheckRunRecord) -> Self {
        Self {
            status: check.status,
            conclusion: check.conclusion,
            output_summary: check.output_summary.clone(),
            output_text: check.output_text.clone(),
            started_at: check.started_at,
            completed_at: check.completed_at,
            details_url: check.details_url.clone(),
            logs_url: check.logs_url.clone(),
        }
    }
}

impl From<&StoredCheckRun> for CheckRunSnapshot {
    fn from(check: &StoredCheckRun) -> Self {
        Self {
            status: check.status,
            conclusion: check.conclusion,
            output_summary: check.output_summary.clone(),
            output_text: check.output_text.clone(),
            started_at: check.started_at,
            completed_at: check.completed_at,
            details_url: check.details_url.clone(),
            logs_url: check.logs_url.clone(),
        }
    }
}

/// What an event is about, with the before and after snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "subject", rename_all = "snake_case")]
pub enum EventSubject {
    PullRequest {
        number: u64,
        old: Option<PrSnapshot>,
        new: PrSnapshot,
    },
    CheckRun {
        external_id: u64,
        old: Option<CheckRunSnapshot>,
        new: CheckRunSnapshot,
    },
}

/// One detected change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub event_type: EventType,
    pub subject: EventSubject,
    pub diffs: Vec<FieldDiff>,
    pub severity: Severity,
}

impl ChangeEvent {
    /// Names of the changed attributes, in diff order.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<ChangedField> {
        self.diffs.iter().map(|d| d.field).collect()
    }

    /// Whether the event is for a record seen for the first time.
    #[must_use]
    pub fn is_creation(&self) -> bool {
        matches!(
            self.event_type,
            EventType::PrCreated | EventType::CheckRunCreated
        )
    }

    /// Whether a check run's status differs.
    #[must_use]
    pub fn status_changed(&self) -> bool {
        self.has_diff(ChangedField::CheckRun(CheckRunField::Status))
    }

    /// Whether a check run's conclusion differs.
    #[must_use]
    pub fn conclusion_changed(&self) -> bool {
        self.has_diff(ChangedField::CheckRun(CheckRunField::Conclusion))
    }

    /// The old value of a changed field, if it changed.
    #[must_use]
    pub fn old_value(&self, field: ChangedField) -> Option<&FieldValue> {
        self.diffs.iter().find(|d| d.field == field).map(|d| &d.old)
    }

    fn has_diff(&self, field: ChangedField) -> bool {
        self.diffs.iter().any(|d| d.field == field)
    }
}
