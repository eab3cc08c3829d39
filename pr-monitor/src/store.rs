//! Persistence collaborator.
//!
//! The pipeline reads stored state through [`Store`] and writes exclusively
//! through [`Store::write_transaction`], which runs a unit of work against a
//! [`WriteTx`] inside one database transaction. [`SqliteStore`] is the
//! production implementation.

mod error;
mod sqlite;

pub use error::StoreError;
pub use sqlite::{RowCounts, SqliteStore};

use crate::models::{
    CheckRunRecord, PrRecord, StateHistoryEntry, StoredCheckRun, StoredPullRequest,
    StoredRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A unit of work executed inside one write transaction.
///
/// Returning an error rolls back everything the work wrote.
pub type WriteWork =
    Box<dyn FnOnce(&mut dyn WriteTx) -> Result<usize, StoreError> + Send + 'static>;

/// Read access plus transactional writes.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_repository_by_id(&self, id: i64) -> Result<Option<StoredRepository>, StoreError>;

    async fn get_active_repositories(&self) -> Result<Vec<StoredRepository>, StoreError>;

    /// Active repositories whose polling interval has elapsed at `now`,
    /// most urgent first.
    async fn get_repositories_needing_poll(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredRepository>, StoreError>;

    async fn get_pr_by_repo_and_number(
        &self,
        repository_id: i64,
        number: u64,
    ) -> Result<Option<StoredPullRequest>, StoreError>;

    async fn get_check_runs_for_pr(
        &self,
        pull_request_id: i64,
    ) -> Result<Vec<StoredCheckRun>, StoreError>;

    async fn mark_repository_polled(
        &self,
        repository_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Runs `work` inside one transaction and commits if it succeeds.
    ///
    /// # Returns
    ///
    /// The count returned by `work`.
    async fn write_transaction(&self, work: WriteWork) -> Result<usize, StoreError>;
}

/// Writes available inside a transaction.
pub trait WriteTx {
    /// Inserts a pull request row and returns its id.
    fn insert_pull_request(&mut self, repository_id: i64, pr: &PrRecord)
        -> Result<i64, StoreError>;

    /// Overwrites an existing pull request row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if no row has `id`.
    fn update_pull_request(&mut self, id: i64, pr: &PrRecord) -> Result<(), StoreError>;

    /// Looks up a pull request row id, seeing rows written earlier in the
    /// same transaction.
    fn find_pull_request_id(
        &mut self,
        repository_id: i64,
        number: u64,
    ) -> Result<Option<i64>, StoreError>;

    /// Inserts a check run row and returns its id.
    fn insert_check_run(
        &mut self,
        pull_request_id: i64,
        check: &CheckRunRecord,
    ) -> Result<i64, StoreError>;

    /// Overwrites an existing check run row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RowNotFound`] if no row has `id`.
    fn update_check_run(&mut self, id: i64, check: &CheckRunRecord) -> Result<(), StoreError>;

    fn append_state_history(&mut self, entry: &StateHistoryEntry) -> Result<(), StoreError>;
}
