//! Processing sessions and their phase state machine.

use super::error::ProcessorError;
use crate::summary::{ProcessingError, ProcessingResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// How repositories are selected and processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingMode {
    /// Every active repository, full history, cache cleared.
    Full,
    /// Repositories due for polling, changes since their last poll.
    Incremental,
    /// Like [`ProcessingMode::Full`] but nothing is written.
    DryRun,
}

impl ProcessingMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::DryRun => "dry_run",
        }
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session phase.
///
/// ```text
/// INITIALIZATION -> DISCOVERY -> CHANGE_DETECTION -> SYNCHRONIZATION -> CLEANUP -> COMPLETED
///                                       |                                   ^   \-> FAILED
///                                       \------------- (dry run) ----------/
/// ```
///
/// Any non-terminal phase may also move to `CLEANUP` or `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingPhase {
    Initialization,
    Discovery,
    ChangeDetection,
    Synchronization,
    Cleanup,
    Completed,
    Failed,
}

impl ProcessingPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Discovery => "discovery",
            Self::ChangeDetection => "change_detection",
            Self::Synchronization => "synchronization",
            Self::Cleanup => "cleanup",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: ProcessingPhase) -> bool {
        use ProcessingPhase::*;

        if self.is_terminal() || *self == next {
            return false;
        }

        match (*self, next) {
            (_, Cleanup | Failed) => true,
            (Initialization, Discovery) => true,
            (Discovery, ChangeDetection) => true,
            (ChangeDetection, Synchronization) => true,
            (Cleanup, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    pub from: ProcessingPhase,
    pub to: ProcessingPhase,
    pub at: DateTime<Utc>,
}

/// Process resource usage observed by the sampler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceMetrics {
    pub samples: usize,
    pub current_memory_mb: f64,
    pub peak_memory_mb: f64,
    pub current_cpu_percent: f64,
    pub average_cpu_percent: f64,
}

impl ResourceMetrics {
    pub(crate) fn record(&mut self, memory_mb: f64, cpu_percent: f64) {
        self.samples += 1;
        self.current_memory_mb = memory_mb;
        self.peak_memory_mb = self.peak_memory_mb.max(memory_mb);
        self.current_cpu_percent = cpu_percent;
        self.average_cpu_percent +=
            (cpu_percent - self.average_cpu_percent) / self.samples as f64;
    }
}

/// Fleet-level aggregate of one `process_repositories` call.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSession {
    pub id: Uuid,
    pub mode: ProcessingMode,
    pub phase: ProcessingPhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub transitions: Vec<PhaseTransition>,

    pub total_repositories: usize,
    pub repositories_processed: usize,
    pub repositories_succeeded: usize,
    pub repositories_failed: usize,

    pub prs_discovered: usize,
    pub check_runs_discovered: usize,
    pub changes_detected: usize,
    pub changes_synchronized: usize,
    pub actionable_events: usize,

    /// Session-level errors (not per-repository ones).
    pub errors: Vec<ProcessingError>,
    pub warnings: Vec<String>,

    pub resources: ResourceMetrics,

    /// Highest number of repository tasks running at once.
    pub peak_in_flight: usize,

    pub recovery_attempted: bool,
}

impl ProcessingSession {
    pub fn new(mode: ProcessingMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            phase: ProcessingPhase::Initialization,
            started_at: Utc::now(),
            finished_at: None,
            transitions: Vec::new(),
            total_repositories: 0,
            repositories_processed: 0,
            repositories_succeeded: 0,
            repositories_failed: 0,
            prs_discovered: 0,
            check_runs_discovered: 0,
            changes_detected: 0,
            changes_synchronized: 0,
            actionable_events: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            resources: ResourceMetrics::default(),
            peak_in_flight: 0,
            recovery_attempted: false,
        }
    }

    /// Moves to `next`, recording the transition time.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidTransition`] if the state machine
    /// does not allow it.
    pub fn transition_to(&mut self, next: ProcessingPhase) -> Result<(), ProcessorError> {
        if !self.phase.can_transition_to(next) {
            return Err(ProcessorError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        let at = Utc::now();
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to: next,
            at,
        });
        self.phase = next;
        if next.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }

    /// Folds one repository result into the counters.
    pub fn record_result(&mut self, result: &ProcessingResult) {
        self.repositories_processed += 1;
        if result.success {
            self.repositories_succeeded += 1;
        } else {
            self.repositories_failed += 1;
        }
        self.prs_discovered += result.prs_discovered;
        self.check_runs_discovered += result.check_runs_discovered;
        self.changes_detected += result.changes_detected;
        self.changes_synchronized += result.changes_synchronized;
        self.actionable_events += result.actionable_events.len();
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Successful repositories over processed ones; 1.0 when none were processed.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.repositories_processed == 0 {
            return 1.0;
        }
        self.repositories_succeeded as f64 / self.repositories_processed as f64
    }

    /// Time since the session started, or its total length once finished.
    #[must_use]
    pub fn duration(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    /// Repositories processed per second.
    #[must_use]
    pub fn processing_rate(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs <= f64::EPSILON {
            return 0.0;
        }
        self.repositories_processed as f64 / secs
    }

    /// When the session entered `phase`, if it did.
    #[must_use]
    pub fn entered_at(&self, phase: ProcessingPhase) -> Option<DateTime<Utc>> {
        self.transitions
            .iter()
            .find(|t| t.to == phase)
            .map(|t| t.at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessingPhase::*;

    #[test]
    fn follows_the_full_path() {
        let mut session = ProcessingSession::new(ProcessingMode::Full);
        for phase in [Discovery, ChangeDetection, Synchronization, Cleanup, Completed] {
            session.transition_to(phase).unwrap();
        }

        assert_eq!(session.phase, Completed);
        assert_eq!(session.transitions.len(), 5);
        assert!(session.finished_at.is_some());
        assert!(session.entered_at(Synchronization).is_some());
    }

    #[test]
    fn dry_run_skips_synchronization() {
        let mut session = ProcessingSession::new(ProcessingMode::DryRun);
        session.transition_to(Discovery).unwrap();
        session.transition_to(ChangeDetection).unwrap();
        session.transition_to(Cleanup).unwrap();
        session.transition_to(Completed).unwrap();

        assert!(session.entered_at(Synchronization).is_none());
    }

    #[test]
    fn rejects_skipping_phases() {
        let mut session = ProcessingSession::new(ProcessingMode::Full);
        assert!(matches!(
            session.transition_to(Synchronization),
            Err(ProcessorError::InvalidTransition {
                from: Initialization,
                to: Synchronization
            })
        ));
        assert!(session.transition_to(Completed).is_err());
    }

    #[test]
    fn terminal_phases_accept_nothing() {
        for terminal in [Completed, Failed] {
            for next in [
                Initialization,
                Discovery,
                ChangeDetection,
                Synchronization,
                Cleanup,
                Completed,
                Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn any_active_phase_can_recover_or_fail() {
        for phase in [Initialization, Discovery, ChangeDetection, Synchronization] {
            assert!(phase.can_transition_to(Cleanup));
            assert!(phase.can_transition_to(Failed));
        }
        assert!(Cleanup.can_transition_to(Failed));
    }

    #[test]
    fn success_rate_of_empty_session() {
        assert_eq!(ProcessingSession::new(ProcessingMode::Full).success_rate(), 1.0);
    }

    #[test]
    fn resource_metrics_track_peak_and_average() {
        let mut metrics = ResourceMetrics::default();
        metrics.record(100.0, 10.0);
        metrics.record(300.0, 30.0);
        metrics.record(200.0, 20.0);

        assert_eq!(metrics.samples, 3);
        assert_eq!(metrics.peak_memory_mb, 300.0);
        assert_eq!(metrics.current_memory_mb, 200.0);
        assert!((metrics.average_cpu_percent - 20.0).abs() < 1e-9);
    }
}
