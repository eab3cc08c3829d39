//! Domain records shared by discovery, detection and synchronization.
//!
//! - [`RepositoryContext`] / [`StoredRepository`] - repositories being watched
//! - [`PrRecord`] / [`StoredPullRequest`] - pull request snapshots
//! - [`CheckRunRecord`] / [`StoredCheckRun`] - CI check run snapshots
//! - [`StateHistoryEntry`] - append-only transition log rows

mod check_run;
mod history;
mod pull_request;
mod repository;

pub use check_run::{CheckConclusion, CheckRunRecord, CheckStatus, StoredCheckRun};
pub use history::{HistorySubject, StateHistoryEntry};
pub use pull_request::{PrRecord, PrState, StoredPullRequest};
pub use repository::{sort_by_poll_priority, NewRepository, RepositoryContext, StoredRepository};
