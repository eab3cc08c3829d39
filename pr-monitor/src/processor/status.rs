//! Point-in-time status for external polling.

use super::session::{ProcessingMode, ProcessingPhase, ProcessingSession};
use serde::Serialize;

/// Whether a session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Idle,
    Active,
}

/// Progress through the selected repositories.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressStatus {
    pub processed: usize,
    pub total: usize,
    pub success_rate: f64,
}

/// Throughput and resource figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsStatus {
    pub duration_secs: f64,

    /// Repositories per second.
    pub rate: f64,

    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub prs: usize,
    pub checks: usize,
    pub changes: usize,
}

/// Snapshot returned by `Processor::processing_status`.
///
/// Serializes to JSON for dashboards and health checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStatus {
    pub status: ActivityStatus,
    pub session_id: Option<String>,
    pub phase: Option<ProcessingPhase>,
    pub mode: Option<ProcessingMode>,
    pub progress: Option<ProgressStatus>,
    pub metrics: Option<MetricsStatus>,
    pub error_count: usize,
    pub warning_count: usize,
}

impl ProcessingStatus {
    /// Status when no session is running.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            status: ActivityStatus::Idle,
            session_id: None,
            phase: None,
            mode: None,
            progress: None,
            metrics: None,
            error_count: 0,
            warning_count: 0,
        }
    }

    /// Status of a running session.
    #[must_use]
    pub fn active(session: &ProcessingSession) -> Self {
        let resources = &session.resources;
        Self {
            status: ActivityStatus::Active,
            session_id: Some(session.id.to_string()),
            phase: Some(session.phase),
            mode: Some(session.mode),
            progress: Some(ProgressStatus {
                processed: session.repositories_processed,
                total: session.total_repositories,
                success_rate: session.success_rate(),
            }),
            metrics: Some(MetricsStatus {
                duration_secs: session.duration().as_secs_f64(),
                rate: session.processing_rate(),
                memory_mb: resources.current_memory_mb,
                cpu_percent: resources.current_cpu_percent,
                prs: session.prs_discovered,
                checks: session.check_runs_discovered,
                changes: session.changes_detected,
            }),
            error_count: session.errors.len(),
            warning_count: session.warnings.len(),
        }
    }
}
