//! Change records and the per-repository change set.

use super::events::ChangeEvent;
use crate::models::{CheckRunRecord, PrRecord};

/// Whether a record is new or replaces an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    New,
    Updated { existing_id: i64 },
}

impl ChangeType {
    /// The database id of the row being replaced.
    #[must_use]
    pub fn existing_id(&self) -> Option<i64> {
        match self {
            Self::New => None,
            Self::Updated { existing_id } => Some(*existing_id),
        }
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New)
    }
}

/// A pull request that needs to be written.
#[derive(Debug, Clone)]
pub struct PrChange {
    pub record: PrRecord,
    pub change_type: ChangeType,

    /// The event describing the change; its diffs carry the old values.
    pub event: ChangeEvent,
}

/// A check run that needs to be written.
#[derive(Debug, Clone)]
pub struct CheckRunChange {
    pub record: CheckRunRecord,

    /// Number of the pull request whose head commit the check ran on.
    pub pr_number: u64,

    pub change_type: ChangeType,
    pub event: ChangeEvent,
}

/// Every detected difference for one repository in one pass.
///
/// Consumed by value by the synchronizer.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub repository_id: i64,
    pub new_prs: Vec<PrChange>,
    pub updated_prs: Vec<PrChange>,
    pub new_check_runs: Vec<CheckRunChange>,
    pub updated_check_runs: Vec<CheckRunChange>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn empty(repository_id: i64) -> Self {
        Self {
            repository_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.new_prs.len()
            + self.updated_prs.len()
            + self.new_check_runs.len()
            + self.updated_check_runs.len()
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// All change events, PRs first.
    pub fn events(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.new_prs
            .iter()
            .chain(&self.updated_prs)
            .map(|c| &c.event)
            .chain(
                self.new_check_runs
                    .iter()
                    .chain(&self.updated_check_runs)
                    .map(|c| &c.event),
            )
    }
}

/// Partitions change records into a change set by change type.
#[must_use]
pub fn create_change_set(
    repository_id: i64,
    pr_changes: Vec<PrChange>,
    check_run_changes: Vec<CheckRunChange>,
) -> ChangeSet {
    let (new_prs, updated_prs) = pr_changes
        .into_iter()
        .partition(|c| c.change_type.is_new());
    let (new_check_runs, updated_check_runs) = check_run_changes
        .into_iter()
        .partition(|c| c.change_type.is_new());

    ChangeSet {
        repository_id,
        new_prs,
        updated_prs,
        new_check_runs,
        updated_check_runs,
    }
}
