//! Typed per-repository error entries.

use crate::github::GitHubError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Classification of a [`ProcessingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Repository, commit or PR no longer exists.
    NotFound,
    /// Any other GitHub API failure.
    ApiError,
    /// One payload could not be parsed and was skipped.
    MalformedRecord,
    /// The discovery phase produced nothing usable.
    DiscoveryFailure,
    /// Stored state could not be read or diffed.
    ChangeDetectionFailure,
    /// The change set transaction was rolled back.
    SynchronizationFailure,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ApiError => "api_error",
            Self::MalformedRecord => "malformed_record",
            Self::DiscoveryFailure => "discovery_failure",
            Self::ChangeDetectionFailure => "change_detection_failure",
            Self::SynchronizationFailure => "synchronization_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One error recorded while processing a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingError {
    pub kind: ErrorKind,
    pub message: String,

    /// Free-form identifiers (repository, state, PR number, commit, ...).
    pub context: BTreeMap<String, String>,
}

impl ProcessingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Converts a collaborator error, keeping not-found distinct.
    pub fn from_github(error: &GitHubError) -> Self {
        let kind = if error.is_not_found() {
            ErrorKind::NotFound
        } else {
            ErrorKind::ApiError
        };
        Self::new(kind, error.to_string())
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        for (key, value) in &self.context {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}
