//! Severity classification.
//!
//! [`SEVERITY_RULES`] is the only place severity is decided. Rules are
//! evaluated in order and the first matching rule wins; an event matching no
//! rule is [`Severity::Low`].

use super::events::{ChangeEvent, EventSubject, EventType};
use crate::models::CheckStatus;
use serde::Serialize;
use std::fmt;

/// Priority of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named predicate over an event subject.
pub struct SeverityRule {
    pub name: &'static str,
    pub matches: fn(&EventSubject) -> bool,
    pub severity: Severity,
}

/// Ordered rule table, first match wins.
pub static SEVERITY_RULES: &[SeverityRule] = &[
    SeverityRule {
        name: "check_run_failed",
        matches: check_run_failed,
        severity: Severity::High,
    },
    SeverityRule {
        name: "pr_closed_or_merged",
        matches: pr_closed_or_merged,
        severity: Severity::High,
    },
    SeverityRule {
        name: "check_run_completed_or_pr_ready",
        matches: check_run_completed_or_pr_ready,
        severity: Severity::Medium,
    },
    SeverityRule {
        name: "pr_commits_changed",
        matches: pr_commits_changed,
        severity: Severity::Medium,
    },
];

/// Classifies one subject.
#[must_use]
pub fn classify(subject: &EventSubject) -> Severity {
    SEVERITY_RULES
        .iter()
        .find(|rule| (rule.matches)(subject))
        .map_or(Severity::Low, |rule| rule.severity)
}

/// Re-applies the rule table to every event.
///
/// Idempotent: running it twice yields the same severities.
#[must_use]
pub fn analyze_significance(mut events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    for event in &mut events {
        event.severity = classify(&event.subject);
    }
    events
}

/// Whether an event should be surfaced to downstream consumers.
///
/// Keeps HIGH and above, new check run failures, PR transitions into
/// closed or merged, and new non-draft pull requests.
#[must_use]
pub fn is_actionable(event: &ChangeEvent) -> bool {
    if event.severity >= Severity::High {
        return true;
    }

    match (&event.subject, event.event_type) {
        (EventSubject::CheckRun { new, .. }, EventType::CheckRunCreated) => {
            new.conclusion.is_some_and(|c| c.is_failure())
        }
        (EventSubject::PullRequest { new, .. }, EventType::PrCreated) => !new.draft,
        (subject @ EventSubject::PullRequest { .. }, _) => pr_closed_or_merged(subject),
        _ => false,
    }
}

/// Keeps only actionable events.
#[must_use]
pub fn filter_actionable_changes(events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    events.into_iter().filter(is_actionable).collect()
}

fn check_run_failed(subject: &EventSubject) -> bool {
    match subject {
        EventSubject::CheckRun { old, new, .. } => {
            new.conclusion.is_some_and(|c| c.is_failure())
                && old.as_ref().map_or(true, |o| o.conclusion != new.conclusion)
        }
        EventSubject::PullRequest { .. } => false,
    }
}

fn pr_closed_or_merged(subject: &EventSubject) -> bool {
    match subject {
        EventSubject::PullRequest { old, new, .. } => {
            new.state.is_terminal() && old.as_ref().map_or(true, |o| o.state != new.state)
        }
        EventSubject::CheckRun { .. } => false,
    }
}

fn check_run_completed_or_pr_ready(subject: &EventSubject) -> bool {
    match subject {
        EventSubject::CheckRun { old, new, .. } => {
            new.status == CheckStatus::Completed
                && old.as_ref().map_or(true, |o| o.status != CheckStatus::Completed)
        }
        EventSubject::PullRequest { old, new, .. } => {
            old.as_ref().is_some_and(|o| o.draft) && !new.draft
        }
    }
}

fn pr_commits_changed(subject: &EventSubject) -> bool {
    match subject {
        EventSubject::PullRequest {
            old: Some(old),
            new,
            ..
        } => old.head_sha != new.head_sha || old.base_sha != new.base_sha,
        _ => false,
    }
}
