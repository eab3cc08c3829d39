//! Processing result types.

use super::error::{ErrorKind, ProcessingError};
use crate::detection::ChangeEvent;
use crate::models::RepositoryContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Outcome of processing a single repository.
///
/// Built by the processor and returned by value; never modified afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    /// Repository database id.
    pub repository_id: i64,

    /// Repository full name.
    pub repository: String,

    /// Pull requests returned by discovery.
    pub prs_discovered: usize,

    /// Check runs returned by discovery, across all open PRs.
    pub check_runs_discovered: usize,

    /// Entries in the change set.
    pub changes_detected: usize,

    /// Rows written by the synchronizer.
    pub changes_synchronized: usize,

    /// Detected events that passed the actionable filter.
    pub actionable_events: Vec<ChangeEvent>,

    /// Whether every phase completed.
    pub success: bool,

    /// The phase that failed, if any.
    pub failed_phase: Option<ErrorKind>,

    /// Every error recorded, fatal or not.
    pub errors: Vec<ProcessingError>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessingResult {
    /// Wall-clock processing time.
    #[must_use]
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// Accumulates a [`ProcessingResult`] while a repository moves through the
/// pipeline.
pub(crate) struct ResultBuilder {
    result: ProcessingResult,
}

impl ResultBuilder {
    pub(crate) fn new(repo: &RepositoryContext) -> Self {
        let now = Utc::now();
        Self {
            result: ProcessingResult {
                repository_id: repo.id,
                repository: repo.full_name.clone(),
                prs_discovered: 0,
                check_runs_discovered: 0,
                changes_detected: 0,
                changes_synchronized: 0,
                actionable_events: Vec::new(),
                success: false,
                failed_phase: None,
                errors: Vec::new(),
                started_at: now,
                finished_at: now,
            },
        }
    }

    pub(crate) fn discovered(&mut self, prs: usize, check_runs: usize) {
        self.result.prs_discovered = prs;
        self.result.check_runs_discovered = check_runs;
    }

    pub(crate) fn detected(&mut self, changes: usize, actionable: Vec<ChangeEvent>) {
        self.result.changes_detected = changes;
        self.result.actionable_events = actionable;
    }

    pub(crate) fn synchronized(&mut self, rows: usize) {
        self.result.changes_synchronized = rows;
    }

    pub(crate) fn record_errors(&mut self, errors: impl IntoIterator<Item = ProcessingError>) {
        self.result.errors.extend(errors);
    }

    pub(crate) fn succeed(mut self) -> ProcessingResult {
        self.result.success = true;
        self.result.finished_at = Utc::now();
        self.result
    }

    pub(crate) fn fail(mut self, phase: ErrorKind) -> ProcessingResult {
        self.result.success = false;
        self.result.failed_phase = Some(phase);
        self.result.finished_at = Utc::now();
        self.result
    }
}
