//! Fleet-level outcome of one processing session.

use super::result::ProcessingResult;
use crate::processor::ProcessingSession;
use serde::Serialize;

/// The finalized session and every per-repository result.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProcessingResult {
    pub session: ProcessingSession,
    pub results: Vec<ProcessingResult>,
}

impl BatchProcessingResult {
    #[must_use]
    pub fn repositories_processed(&self) -> usize {
        self.results.len()
    }

    /// Per-repository errors plus session-level errors.
    #[must_use]
    pub fn total_errors(&self) -> usize {
        self.results.iter().map(ProcessingResult::error_count).sum::<usize>()
            + self.session.errors.len()
    }

    /// Share of successful repositories; 1.0 when nothing was processed.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 1.0;
        }
        let succeeded = self.results.iter().filter(|r| r.success).count();
        succeeded as f64 / self.results.len() as f64
    }

    /// Results of repositories that failed a phase.
    pub fn failures(&self) -> impl Iterator<Item = &ProcessingResult> {
        self.results.iter().filter(|r| !r.success)
    }
}
