//! State change detection.
//!
//! Diffs freshly discovered records against stored state and produces a
//! [`ChangeSet`]. Diffing and severity classification are pure; only
//! [`ChangeDetector`] reads from the store.

mod change_set;
mod events;
mod severity;

pub use change_set::{create_change_set, ChangeSet, ChangeType, CheckRunChange, PrChange};
pub use events::{
    ChangeEvent, ChangedField, CheckRunField, CheckRunSnapshot, EventSubject, EventType,
    FieldDiff, FieldValue, PrField, PrSnapshot,
};
pub use severity::{
    analyze_significance, classify, filter_actionable_changes, is_actionable, Severity,
    SeverityRule, SEVERITY_RULES,
};

use crate::discovery::ChecksByPr;
use crate::models::{CheckRunRecord, PrRecord, StoredCheckRun, StoredPullRequest};
use crate::store::{Store, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading stored state for comparison.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load stored state for PR #{pr_number}: {source}")]
    Store {
        pr_number: u64,
        #[source]
        source: StoreError,
    },
}

/// Detects changes to one pull request.
///
/// No stored row yields a single `PR_CREATED` event. Otherwise each compared
/// field is checked for equality; no differences yield no events.
#[must_use]
pub fn detect_pr_changes(old: Option<&StoredPullRequest>, new: &PrRecord) -> Vec<ChangeEvent> {
    let new_snapshot = PrSnapshot::from(new);

    let Some(old) = old else {
        let subject = EventSubject::PullRequest {
            number: new.number,
            old: None,
            new: new_snapshot,
        };
        return vec![ChangeEvent {
            event_type: EventType::PrCreated,
            severity: classify(&subject),
            diffs: vec![FieldDiff {
                field: ChangedField::Pr(PrField::Created),
                old: FieldValue::Absent,
                new: FieldValue::Absent,
            }],
            subject,
        }];
    };

    let old_snapshot = PrSnapshot::from(old);
    let diffs: Vec<FieldDiff> = PrField::COMPARED
        .iter()
        .filter_map(|&field| {
            let before = old_snapshot.value(field);
            let after = new_snapshot.value(field);
            (before != after).then(|| FieldDiff {
                field: ChangedField::Pr(field),
                old: before,
                new: after,
            })
        })
        .collect();

    if diffs.is_empty() {
        return Vec::new();
    }

    let event_type = if old_snapshot.state == new_snapshot.state {
        EventType::PrUpdated
    } else {
        EventType::PrStateChanged
    };
    let subject = EventSubject::PullRequest {
        number: new.number,
        old: Some(old_snapshot),
        new: new_snapshot,
    };

    vec![ChangeEvent {
        event_type,
        severity: classify(&subject),
        diffs,
        subject,
    }]
}

/// Detects changes across one PR's check runs, keyed by external id.
///
/// Events follow the order of `new`.
#[must_use]
pub fn detect_check_run_changes(old: &[StoredCheckRun], new: &[CheckRunRecord]) -> Vec<ChangeEvent> {
    let stored: HashMap<u64, &StoredCheckRun> = old.iter().map(|c| (c.external_id, c)).collect();

    new.iter()
        .filter_map(|check| detect_check_run_change(stored.get(&check.external_id).copied(), check))
        .collect()
}

fn detect_check_run_change(
    old: Option<&StoredCheckRun>,
    new: &CheckRunRecord,
) -> Option<ChangeEvent> {
    let new_snapshot = CheckRunSnapshot::from(new);

    let Some(old) = old else {
        let subject = EventSubject::CheckRun {
            external_id: new.external_id,
            old: None,
            new: new_snapshot,
        };
        return Some(ChangeEvent {
            event_type: EventType::CheckRunCreated,
            severity: classify(&subject),
            diffs: vec![FieldDiff {
                field: ChangedField::CheckRun(CheckRunField::Created),
                old: FieldValue::Absent,
                new: FieldValue::Absent,
            }],
            subject,
        });
    };

    let old_snapshot = CheckRunSnapshot::from(old);
    let diffs: Vec<FieldDiff> = CheckRunField::COMPARED
        .iter()
        .filter_map(|&field| {
            let before = old_snapshot.value(field);
            let after = new_snapshot.value(field);
            (before != after).then(|| FieldDiff {
                field: ChangedField::CheckRun(field),
                old: before,
                new: after,
            })
        })
        .collect();

    if diffs.is_empty() {
        return None;
    }

    let event_type = if old_snapshot.status != new_snapshot.status
        || old_snapshot.conclusion != new_snapshot.conclusion
    {
        EventType::CheckRunStatusChanged
    } else {
        EventType::CheckRunUpdated
    };
    let subject = EventSubject::CheckRun {
        external_id: new.external_id,
        old: Some(old_snapshot),
        new: new_snapshot,
    };

    Some(ChangeEvent {
        event_type,
        severity: classify(&subject),
        diffs,
        subject,
    })
}

/// Compares discovered state with the store.
pub struct ChangeDetector {
    store: Arc<dyn Store>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Builds the change set for one repository.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError`] if stored state cannot be read.
    pub async fn detect_repository_changes(
        &self,
        repository_id: i64,
        prs: &[PrRecord],
        checks_by_pr: &ChecksByPr,
    ) -> Result<ChangeSet, DetectionError> {
        let mut pr_changes = Vec::new();
        let mut check_changes = Vec::new();

        for pr in prs {
            let stored = self
                .store
                .get_pr_by_repo_and_number(repository_id, pr.number)
                .await
                .map_err(|source| DetectionError::Store {
                    pr_number: pr.number,
                    source,
                })?;

            let events = analyze_significance(detect_pr_changes(stored.as_ref(), pr));
            for event in events {
                pr_changes.push(PrChange {
                    record: pr.clone(),
                    change_type: change_type(stored.as_ref().map(|s| s.id)),
                    event,
                });
            }

            let Some(checks) = checks_by_pr.get(&pr.number) else {
                continue;
            };

            let stored_checks = match &stored {
                Some(stored) => self
                    .store
                    .get_check_runs_for_pr(stored.id)
                    .await
                    .map_err(|source| DetectionError::Store {
                        pr_number: pr.number,
                        source,
                    })?,
                None => Vec::new(),
            };
            let existing_ids: HashMap<u64, i64> = stored_checks
                .iter()
                .map(|c| (c.external_id, c.id))
                .collect();
            let records: HashMap<u64, &CheckRunRecord> =
                checks.iter().map(|c| (c.external_id, c)).collect();

            let events = analyze_significance(detect_check_run_changes(&stored_checks, checks));
            for event in events {
                let EventSubject::CheckRun { external_id, .. } = &event.subject else {
                    continue;
                };
                let external_id = *external_id;
                let Some(record) = records.get(&external_id) else {
                    continue;
                };
                check_changes.push(CheckRunChange {
                    record: (*record).clone(),
                    pr_number: pr.number,
                    change_type: change_type(existing_ids.get(&external_id).copied()),
                    event,
                });
            }
        }

        let change_set = create_change_set(repository_id, pr_changes, check_changes);
        debug!(
            repository_id,
            total = change_set.total_changes(),
            new_prs = change_set.new_prs.len(),
            updated_prs = change_set.updated_prs.len(),
            new_check_runs = change_set.new_check_runs.len(),
            updated_check_runs = change_set.updated_check_runs.len(),
            "Detected changes"
        );
        Ok(change_set)
    }
}

fn change_type(existing_id: Option<i64>) -> ChangeType {
    match existing_id {
        Some(existing_id) => ChangeType::Updated { existing_id },
        None => ChangeType::New,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckConclusion, CheckStatus, PrState};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn record(number: u64, title: &str) -> PrRecord {
        PrRecord {
            number,
            title: title.to_string(),
            author: "octocat".to_string(),
            state: PrState::Opened,
            draft: false,
            base_branch: "main".to_string(),
            base_sha: "base000".to_string(),
            head_branch: "feature".to_string(),
            head_sha: "head000".to_string(),
            url: format!("https://github.com/acme/widgets/pull/{number}"),
            body: None,
            labels: Vec::new(),
            assignees: Vec::new(),
            milestone: None,
            created_at: at(0),
            updated_at: at(1),
            closed_at: None,
            merged_at: None,
            raw_metadata: serde_json::Value::Null,
        }
    }

    fn stored(pr: &PrRecord, id: i64) -> StoredPullRequest {
        StoredPullRequest {
            id,
            repository_id: 1,
            number: pr.number,
            title: pr.title.clone(),
            author: pr.author.clone(),
            state: pr.state,
            draft: pr.draft,
            base_branch: pr.base_branch.clone(),
            base_sha: pr.base_sha.clone(),
            head_branch: pr.head_branch.clone(),
            head_sha: pr.head_sha.clone(),
            url: pr.url.clone(),
            body: pr.body.clone(),
            labels: pr.labels.clone(),
            assignees: pr.assignees.clone(),
            milestone: pr.milestone.clone(),
            created_at: pr.created_at,
            last_updated_at: pr.updated_at,
            closed_at: pr.closed_at,
            merged_at: pr.merged_at,
        }
    }

    fn check(id: u64, status: CheckStatus, conclusion: Option<CheckConclusion>) -> CheckRunRecord {
        CheckRunRecord {
            external_id: id,
            name: format!("check-{id}"),
            status,
            conclusion,
            check_suite_id: None,
            details_url: None,
            logs_url: None,
            output_title: None,
            output_summary: None,
            output_text: None,
            started_at: Some(at(1)),
            completed_at: None,
        }
    }

    fn stored_check(check: &CheckRunRecord, id: i64) -> StoredCheckRun {
        StoredCheckRun {
            id,
            pull_request_id: 1,
            external_id: check.external_id,
            name: check.name.clone(),
            status: check.status,
            conclusion: check.conclusion,
            check_suite_id: check.check_suite_id,
            details_url: check.details_url.clone(),
            logs_url: check.logs_url.clone(),
            output_title: check.output_title.clone(),
            output_summary: check.output_summary.clone(),
            output_text: check.output_text.clone(),
            started_at: check.started_at,
            completed_at: check.completed_at,
        }
    }

    #[test]
    fn unseen_pr_is_created() {
        let events = detect_pr_changes(None, &record(1, "Add widgets"));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::PrCreated);
        assert_eq!(
            events[0].changed_fields(),
            vec![ChangedField::Pr(PrField::Created)]
        );
    }

    #[test]
    fn title_change_is_an_update() {
        let old = stored(&record(42, "A"), 7);
        let events = detect_pr_changes(Some(&old), &record(42, "B"));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::PrUpdated);
        assert_eq!(
            events[0].changed_fields(),
            vec![ChangedField::Pr(PrField::Title)]
        );
        assert_eq!(
            events[0].old_value(ChangedField::Pr(PrField::Title)),
            Some(&FieldValue::Text("A".to_string()))
        );
    }

    #[test]
    fn identical_pr_yields_nothing() {
        let pr = record(3, "Same");
        assert!(detect_pr_changes(Some(&stored(&pr, 1)), &pr).is_empty());
    }

    #[test]
    fn untracked_fields_are_ignored() {
        let pr = record(3, "Same");
        let mut relabelled = pr.clone();
        relabelled.labels.push("docs".to_string());
        assert!(detect_pr_changes(Some(&stored(&pr, 1)), &relabelled).is_empty());
    }

    #[test]
    fn state_change_is_reported_as_such() {
        let pr = record(5, "Done");
        let mut merged = pr.clone();
        merged.state = PrState::Merged;

        let events = detect_pr_changes(Some(&stored(&pr, 1)), &merged);
        assert_eq!(events[0].event_type, EventType::PrStateChanged);
        assert_eq!(events[0].severity, Severity::High);
    }

    #[test]
    fn pr_detection_is_pure() {
        let old = stored(&record(42, "A"), 7);
        let new = record(42, "B");
        assert_eq!(
            detect_pr_changes(Some(&old), &new),
            detect_pr_changes(Some(&old), &new)
        );
    }

    #[test]
    fn failing_check_reports_status_and_conclusion() {
        let running = check(10, CheckStatus::InProgress, None);
        let mut failed = check(10, CheckStatus::Completed, Some(CheckConclusion::Failure));
        failed.completed_at = Some(at(2));

        let events = detect_check_run_changes(&[stored_check(&running, 1)], &[failed]);

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, EventType::CheckRunStatusChanged);
        assert!(event.status_changed());
        assert!(event.conclusion_changed());
        assert_eq!(event.severity, Severity::High);
        assert_eq!(filter_actionable_changes(events.clone()).len(), 1);
    }

    #[test]
    fn check_events_follow_new_order() {
        let known = check(1, CheckStatus::Queued, None);
        let mut summary_changed = known.clone();
        summary_changed.output_summary = Some("2 of 5 done".to_string());
        let new = vec![
            check(3, CheckStatus::Queued, None),
            summary_changed,
            check(2, CheckStatus::Queued, None),
        ];

        let events = detect_check_run_changes(&[stored_check(&known, 1)], &new);

        let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                EventType::CheckRunCreated,
                EventType::CheckRunUpdated,
                EventType::CheckRunCreated
            ]
        );
    }

    #[test]
    fn unchanged_checks_yield_nothing() {
        let known = check(1, CheckStatus::Completed, Some(CheckConclusion::Success));
        assert!(detect_check_run_changes(&[stored_check(&known, 1)], &[known]).is_empty());
    }

    #[test]
    fn significance_analysis_is_idempotent() {
        let events = detect_check_run_changes(
            &[],
            &[check(1, CheckStatus::Completed, Some(CheckConclusion::Failure))],
        );
        let once = analyze_significance(events);
        let twice = analyze_significance(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn actionable_filter() {
        let mut draft = record(1, "WIP");
        draft.draft = true;
        let draft_created = detect_pr_changes(None, &draft);
        let ready_created = detect_pr_changes(None, &record(2, "Ready"));
        let retitled = detect_pr_changes(Some(&stored(&record(3, "A"), 3)), &record(3, "B"));
        let new_failure = detect_check_run_changes(
            &[],
            &[check(4, CheckStatus::Completed, Some(CheckConclusion::Failure))],
        );
        let new_queued = detect_check_run_changes(&[], &[check(5, CheckStatus::Queued, None)]);

        assert!(!is_actionable(&draft_created[0]));
        assert!(is_actionable(&ready_created[0]));
        assert!(!is_actionable(&retitled[0]));
        assert!(is_actionable(&new_failure[0]));
        assert!(!is_actionable(&new_queued[0]));
    }

    #[test]
    fn change_set_partitions_by_change_type() {
        let created = record(1, "New");
        let updated = record(2, "B");
        let pr_changes = vec![
            PrChange {
                event: detect_pr_changes(None, &created).remove(0),
                record: created,
                change_type: ChangeType::New,
            },
            PrChange {
                event: detect_pr_changes(Some(&stored(&record(2, "A"), 9)), &updated).remove(0),
                record: updated,
                change_type: ChangeType::Updated { existing_id: 9 },
            },
        ];
        let queued = check(7, CheckStatus::Queued, None);
        let check_changes = vec![CheckRunChange {
            event: detect_check_run_changes(&[], std::slice::from_ref(&queued)).remove(0),
            record: queued,
            pr_number: 1,
            change_type: ChangeType::New,
        }];

        let set = create_change_set(1, pr_changes, check_changes);

        assert_eq!(set.new_prs.len(), 1);
        assert_eq!(set.updated_prs.len(), 1);
        assert_eq!(set.new_check_runs.len(), 1);
        assert!(set.updated_check_runs.is_empty());
        assert_eq!(set.total_changes(), 3);
        assert!(set.has_changes());
        assert_eq!(set.events().count(), 3);
        assert!(set.new_prs.iter().all(|c| c.change_type.existing_id().is_none()));
        assert_eq!(set.updated_prs[0].change_type.existing_id(), Some(9));
    }

    #[test]
    fn empty_change_set() {
        let set = ChangeSet::empty(4);
        assert_eq!(set.total_changes(), 0);
        assert!(!set.has_changes());
    }
}
