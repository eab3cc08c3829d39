//! Error types for the processor.

use super::session::ProcessingPhase;
use crate::config::ConfigError;
use crate::store::StoreError;
use crate::summary::BatchProcessingResult;
use thiserror::Error;

/// Errors that propagate out of the processor.
///
/// Per-repository failures never appear here; they are recorded in the
/// repository's [`ProcessingResult`](crate::summary::ProcessingResult).
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A requested repository id does not exist.
    #[error("Unknown repository id {0}")]
    UnknownRepository(i64),

    /// Repository selection or session bookkeeping hit the store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Another session is already running on this processor.
    #[error("A processing session is already active")]
    AlreadyRunning,

    /// The session state machine rejected a transition.
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition {
        from: ProcessingPhase,
        to: ProcessingPhase,
    },

    /// The session was aborted by `stop_on_first_error`.
    #[error("Processing of {repository} failed and stop-on-first-error is set")]
    Aborted { repository: String },

    /// A started session failed; `partial` holds the finalized session and
    /// the results gathered before the failure.
    #[error("Processing session failed: {source}")]
    SessionFailed {
        partial: Box<BatchProcessingResult>,
        #[source]
        source: Box<ProcessorError>,
    },
}

impl ProcessorError {
    /// The error that caused the failure, looking through
    /// [`ProcessorError::SessionFailed`].
    #[must_use]
    pub fn cause(&self) -> &ProcessorError {
        match self {
            Self::SessionFailed { source, .. } => source.cause(),
            other => other,
        }
    }

    /// The finalized session of a failed run, if it got that far.
    #[must_use]
    pub fn partial(&self) -> Option<&BatchProcessingResult> {
        match self {
            Self::SessionFailed { partial, .. } => Some(partial.as_ref()),
            _ => None,
        }
    }
}
