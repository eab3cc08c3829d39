//! Transactional application of change sets.

use crate::detection::{
    ChangeEvent, ChangeSet, ChangedField, CheckRunField, EventType, FieldValue, PrField,
};
use crate::models::{HistorySubject, StateHistoryEntry};
use crate::store::{Store, StoreError, WriteTx, WriteWork};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by [`DataSynchronizer`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// The transaction failed and nothing was persisted.
    #[error("Synchronization of repository {repository_id} rolled back: {source}")]
    RolledBack {
        repository_id: i64,
        #[source]
        source: StoreError,
    },
}

/// Writes change sets to the store, one transaction per repository.
pub struct DataSynchronizer {
    store: Arc<dyn Store>,
    chunk_size: usize,
}

impl DataSynchronizer {
    pub fn new(store: Arc<dyn Store>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Applies every change of `change_set` atomically.
    ///
    /// New PRs are inserted first so new check runs can resolve their owning
    /// row inside the same transaction. State history is appended for PR
    /// state changes and check run conclusion changes.
    ///
    /// An empty change set returns `Ok(0)` without touching the store.
    ///
    /// # Returns
    ///
    /// Number of pull request and check run rows written.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RolledBack`] if any write fails; no change from
    /// this call is persisted in that case.
    pub async fn synchronize_changes(
        &self,
        repository_id: i64,
        change_set: ChangeSet,
    ) -> Result<usize, SyncError> {
        if !change_set.has_changes() {
            debug!(repository_id, "No changes to synchronize");
            return Ok(0);
        }

        let total = change_set.total_changes();
        let chunk_size = self.chunk_size;
        let recorded_at = Utc::now();
        let work: WriteWork = Box::new(move |tx| {
            apply_change_set(tx, repository_id, change_set, chunk_size, recorded_at)
        });

        match self.store.write_transaction(work).await {
            Ok(applied) => {
                info!(repository_id, applied, "Synchronized changes");
                Ok(applied)
            }
            Err(source) => {
                warn!(repository_id, total, error = %source, "Synchronization rolled back");
                Err(SyncError::RolledBack {
                    repository_id,
                    source,
                })
            }
        }
    }
}

fn apply_change_set(
    tx: &mut dyn WriteTx,
    repository_id: i64,
    change_set: ChangeSet,
    chunk_size: usize,
    recorded_at: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let mut applied = 0;

    for (index, chunk) in change_set.new_prs.chunks(chunk_size).enumerate() {
        for change in chunk {
            let id = tx.insert_pull_request(repository_id, &change.record)?;
            tx.append_state_history(&history_entry(
                HistorySubject::PullRequest,
                id,
                None,
                change.record.state.to_string(),
                &change.event,
                recorded_at,
            ))?;
            applied += 1;
        }
        debug!(chunk = index, rows = chunk.len(), "Inserted pull requests");
    }

    for (index, chunk) in change_set.updated_prs.chunks(chunk_size).enumerate() {
        for change in chunk {
            let Some(id) = change.change_type.existing_id() else {
                continue;
            };
            tx.update_pull_request(id, &change.record)?;
            if change.event.event_type == EventType::PrStateChanged {
                tx.append_state_history(&history_entry(
                    HistorySubject::PullRequest,
                    id,
                    old_value(&change.event, ChangedField::Pr(PrField::State)),
                    change.record.state.to_string(),
                    &change.event,
                    recorded_at,
                ))?;
            }
            applied += 1;
        }
        debug!(chunk = index, rows = chunk.len(), "Updated pull requests");
    }

    for (index, chunk) in change_set.new_check_runs.chunks(chunk_size).enumerate() {
        for change in chunk {
            let pull_request_id = tx
                .find_pull_request_id(repository_id, change.pr_number)?
                .ok_or(StoreError::MissingPullRequest {
                    repository_id,
                    number: change.pr_number,
                })?;
            let id = tx.insert_check_run(pull_request_id, &change.record)?;
            if let Some(conclusion) = change.record.conclusion {
                tx.append_state_history(&history_entry(
                    HistorySubject::CheckRun,
                    id,
                    None,
                    conclusion.to_string(),
                    &change.event,
                    recorded_at,
                ))?;
            }
            applied += 1;
        }
        debug!(chunk = index, rows = chunk.len(), "Inserted check runs");
    }

    for (index, chunk) in change_set.updated_check_runs.chunks(chunk_size).enumerate() {
        for change in chunk {
            let Some(id) = change.change_type.existing_id() else {
                continue;
            };
            tx.update_check_run(id, &change.record)?;
            if change.event.conclusion_changed() {
                let field = ChangedField::CheckRun(CheckRunField::Conclusion);
                let new_value = change
                    .event
                    .diffs
                    .iter()
                    .find(|d| d.field == field)
                    .map_or_else(|| FieldValue::Absent.to_string(), |d| d.new.to_string());
                tx.append_state_history(&history_entry(
                    HistorySubject::CheckRun,
                    id,
                    old_value(&change.event, field),
                    new_value,
                    &change.event,
                    recorded_at,
                ))?;
            }
            applied += 1;
        }
        debug!(chunk = index, rows = chunk.len(), "Updated check runs");
    }

    Ok(applied)
}

fn old_value(event: &ChangeEvent, field: ChangedField) -> Option<String> {
    match event.old_value(field) {
        None | Some(FieldValue::Absent) => None,
        Some(value) => Some(value.to_string()),
    }
}

fn history_entry(
    subject: HistorySubject,
    subject_id: i64,
    old_value: Option<String>,
    new_value: String,
    event: &ChangeEvent,
    recorded_at: DateTime<Utc>,
) -> StateHistoryEntry {
    StateHistoryEntry {
        subject,
        subject_id,
        old_value,
        new_value,
        trigger: event.event_type.as_str().to_string(),
        recorded_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ChangeDetector;
    use crate::discovery::ChecksByPr;
    use crate::models::{
        CheckConclusion, CheckRunRecord, CheckStatus, NewRepository, PrRecord, PrState,
    };
    use crate::store::SqliteStore;
    use chrono::TimeZone;

    fn pr(number: u64, title: &str, state: PrState) -> PrRecord {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        PrRecord {
            number,
            title: title.to_string(),
            author: "octocat".to_string(),
            state,
            draft: false,
            base_branch: "main".to_string(),
            base_sha: "base000".to_string(),
            head_branch: "feature".to_string(),
            head_sha: format!("head{number:03}"),
            url: format!("https://github.com/acme/widgets/pull/{number}"),
            body: None,
            labels: Vec::new(),
            assignees: Vec::new(),
            milestone: None,
            created_at: at,
            updated_at: at,
            closed_at: None,
            merged_at: None,
            raw_metadata: serde_json::Value::Null,
        }
    }

    fn check(id: u64, status: CheckStatus, conclusion: Option<CheckConclusion>) -> CheckRunRecord {
        CheckRunRecord {
            external_id: id,
            name: "build".to_string(),
            status,
            conclusion,
            check_suite_id: None,
            details_url: None,
            logs_url: None,
            output_title: None,
            output_summary: None,
            output_text: None,
            started_at: None,
            completed_at: None,
        }
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        repo: i64,
        detector: ChangeDetector,
        synchronizer: DataSynchronizer,
    }

    async fn fixture(chunk_size: usize) -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let repo = store
            .insert_repository(NewRepository::new("acme", "widgets"))
            .await
            .unwrap();
        Fixture {
            detector: ChangeDetector::new(store.clone()),
            synchronizer: DataSynchronizer::new(store.clone(), chunk_size),
            store,
            repo,
        }
    }

    impl Fixture {
        async fn sync(&self, prs: &[PrRecord], checks: ChecksByPr) -> Result<usize, SyncError> {
            let change_set = self
                .detector
                .detect_repository_changes(self.repo, prs, &checks)
                .await
                .unwrap();
            self.synchronizer
                .synchronize_changes(self.repo, change_set)
                .await
        }
    }

    #[tokio::test]
    async fn inserts_prs_and_their_check_runs_together() {
        let f = fixture(1).await;
        let prs = vec![pr(1, "One", PrState::Opened), pr(2, "Two", PrState::Opened)];
        let checks = ChecksByPr::from([(1, vec![check(10, CheckStatus::Queued, None)])]);

        let applied = f.sync(&prs, checks).await.unwrap();

        assert_eq!(applied, 3);
        let counts = f.store.row_counts().await.unwrap();
        assert_eq!(counts.pull_requests, 2);
        assert_eq!(counts.check_runs, 1);
        // Creation of each PR is recorded; the queued check has no conclusion yet.
        assert_eq!(counts.state_history, 2);
    }

    #[tokio::test]
    async fn updates_existing_rows_and_records_transitions() {
        let f = fixture(100).await;
        let open = pr(5, "Ship it", PrState::Opened);
        f.sync(
            &[open.clone()],
            ChecksByPr::from([(5, vec![check(50, CheckStatus::InProgress, None)])]),
        )
        .await
        .unwrap();

        let mut merged = open.clone();
        merged.state = PrState::Merged;
        let applied = f
            .sync(
                &[merged],
                ChecksByPr::from([(
                    5,
                    vec![check(50, CheckStatus::Completed, Some(CheckConclusion::Failure))],
                )]),
            )
            .await
            .unwrap();

        assert_eq!(applied, 2);
        let stored = f
            .store
            .get_pr_by_repo_and_number(f.repo, 5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, PrState::Merged);

        let pr_history = f
            .store
            .state_history(HistorySubject::PullRequest, stored.id)
            .await
            .unwrap();
        assert_eq!(pr_history.len(), 2);
        assert_eq!(pr_history[1].old_value.as_deref(), Some("opened"));
        assert_eq!(pr_history[1].new_value, "merged");
        assert_eq!(pr_history[1].trigger, "pr_state_changed");

        let checks = f.store.get_check_runs_for_pr(stored.id).await.unwrap();
        let check_history = f
            .store
            .state_history(HistorySubject::CheckRun, checks[0].id)
            .await
            .unwrap();
        assert_eq!(check_history.len(), 1);
        assert_eq!(check_history[0].old_value, None);
        assert_eq!(check_history[0].new_value, "failure");
    }

    #[tokio::test]
    async fn empty_change_set_is_a_no_op() {
        let f = fixture(10).await;
        let applied = f
            .synchronizer
            .synchronize_changes(f.repo, ChangeSet::empty(f.repo))
            .await
            .unwrap();
        assert_eq!(applied, 0);
        assert_eq!(f.store.row_counts().await.unwrap().pull_requests, 0);
    }

    #[tokio::test]
    async fn missing_owning_pr_rolls_back_everything() {
        let f = fixture(1).await;
        let prs = vec![pr(1, "One", PrState::Opened)];
        let mut change_set = f
            .detector
            .detect_repository_changes(
                f.repo,
                &prs,
                &ChecksByPr::from([(1, vec![check(10, CheckStatus::Queued, None)])]),
            )
            .await
            .unwrap();
        change_set.new_check_runs[0].pr_number = 404;

        let result = f.synchronizer.synchronize_changes(f.repo, change_set).await;

        assert!(matches!(
            result,
            Err(SyncError::RolledBack {
                source: StoreError::MissingPullRequest { number: 404, .. },
                ..
            })
        ));
        let counts = f.store.row_counts().await.unwrap();
        assert_eq!(counts.pull_requests, 0);
        assert_eq!(counts.check_runs, 0);
        assert_eq!(counts.state_history, 0);
    }

    #[tokio::test]
    async fn vanished_row_rolls_back_everything() {
        let f = fixture(1).await;
        let first = pr(1, "A", PrState::Opened);
        f.sync(&[first.clone()], ChecksByPr::new()).await.unwrap();

        let mut retitled = first.clone();
        retitled.title = "B".to_string();
        let mut change_set = f
            .detector
            .detect_repository_changes(
                f.repo,
                &[retitled, pr(2, "New", PrState::Opened)],
                &ChecksByPr::new(),
            )
            .await
            .unwrap();
        change_set.updated_prs[0].change_type = crate::detection::ChangeType::Updated {
            existing_id: 9999,
        };

        let result = f.synchronizer.synchronize_changes(f.repo, change_set).await;

        assert!(result.is_err());
        assert!(f
            .store
            .get_pr_by_repo_and_number(f.repo, 2)
            .await
            .unwrap()
            .is_none());
        let stored = f
            .store
            .get_pr_by_repo_and_number(f.repo, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, "A");
    }
}
