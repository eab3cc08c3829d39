//! Parsing of raw GitHub payloads into domain records.
//!
//! Each function handles exactly one record so a malformed payload can be
//! skipped without losing the rest of the page.

use crate::models::{CheckConclusion, CheckRunRecord, CheckStatus, PrRecord, PrState};
use crate::summary::{ErrorKind, ProcessingError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Deserialize)]
struct RawRef {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
}

#[derive(Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Deserialize)]
struct RawMilestone {
    title: String,
}

#[derive(Deserialize)]
struct RawPullRequest {
    number: u64,
    title: String,
    user: Option<RawUser>,
    state: String,
    draft: Option<bool>,
    base: RawRef,
    head: RawRef,
    html_url: String,
    body: Option<String>,
    labels: Option<Vec<RawLabel>>,
    assignees: Option<Vec<RawUser>>,
    milestone: Option<RawMilestone>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawCheckSuite {
    id: u64,
}

#[derive(Deserialize)]
struct RawCheckOutput {
    title: Option<String>,
    summary: Option<String>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct RawCheckRun {
    id: u64,
    name: String,
    status: String,
    conclusion: Option<String>,
    check_suite: Option<RawCheckSuite>,
    details_url: Option<String>,
    html_url: Option<String>,
    output: Option<RawCheckOutput>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// Login used by GitHub for deleted accounts.
const GHOST_LOGIN: &str = "ghost";

/// Parses one pull request payload.
///
/// A `closed` PR with a merge timestamp is normalized to [`PrState::Merged`].
pub(crate) fn parse_pull_request(value: Value) -> Result<PrRecord, ProcessingError> {
    let number = value.get("number").and_then(Value::as_u64);
    let raw: RawPullRequest =
        serde_json::from_value(value.clone()).map_err(|e| malformed("pull request", number, e))?;

    let state = match raw.state.as_str() {
        "open" => PrState::Opened,
        "closed" if raw.merged_at.is_some() => PrState::Merged,
        "closed" => PrState::Closed,
        other => {
            return Err(malformed(
                "pull request",
                number,
                format!("unknown state '{other}'"),
            ))
        }
    };

    Ok(PrRecord {
        number: raw.number,
        title: raw.title,
        author: raw
            .user
            .map(|u| u.login)
            .unwrap_or_else(|| GHOST_LOGIN.to_string()),
        state,
        draft: raw.draft.unwrap_or(false),
        base_branch: raw.base.ref_name,
        base_sha: raw.base.sha,
        head_branch: raw.head.ref_name,
        head_sha: raw.head.sha,
        url: raw.html_url,
        body: raw.body,
        labels: raw
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| l.name)
            .collect(),
        assignees: raw
            .assignees
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.login)
            .collect(),
        milestone: raw.milestone.map(|m| m.title),
        created_at: raw.created_at,
        updated_at: raw.updated_at,
        closed_at: raw.closed_at,
        merged_at: raw.merged_at,
        raw_metadata: value,
    })
}

/// Parses one check run payload.
pub(crate) fn parse_check_run(value: Value) -> Result<CheckRunRecord, ProcessingError> {
    let id = value.get("id").and_then(Value::as_u64);
    let raw: RawCheckRun =
        serde_json::from_value(value).map_err(|e| malformed("check run", id, e))?;

    let status = CheckStatus::from_name(&raw.status).ok_or_else(|| {
        malformed(
            "check run",
            Some(raw.id),
            format!("unknown status '{}'", raw.status),
        )
    })?;

    let conclusion = match raw.conclusion.as_deref() {
        None => None,
        Some(name) => Some(CheckConclusion::from_name(name).ok_or_else(|| {
            malformed(
                "check run",
                Some(raw.id),
                format!("unknown conclusion '{name}'"),
            )
        })?),
    };

    let (output_title, output_summary, output_text) = match raw.output {
        Some(output) => (output.title, output.summary, output.text),
        None => (None, None, None),
    };

    Ok(CheckRunRecord {
        external_id: raw.id,
        name: raw.name,
        status,
        conclusion,
        check_suite_id: raw.check_suite.map(|s| s.id),
        details_url: raw.details_url,
        logs_url: raw.html_url,
        output_title,
        output_summary,
        output_text,
        started_at: raw.started_at,
        completed_at: raw.completed_at,
    })
}

/// Splits a check run listing envelope into its items and reported total.
pub(crate) fn unwrap_check_run_envelope(
    value: Value,
) -> Result<(Vec<Value>, Option<u64>), ProcessingError> {
    let Value::Object(mut map) = value else {
        return Err(ProcessingError::new(
            ErrorKind::MalformedRecord,
            "check run listing is not an object",
        ));
    };

    let total = map.get("total_count").and_then(Value::as_u64);
    match map.remove("check_runs") {
        Some(Value::Array(items)) => Ok((items, total)),
        _ => Err(ProcessingError::new(
            ErrorKind::MalformedRecord,
            "check run listing has no check_runs array",
        )),
    }
}

fn malformed(what: &str, id: Option<u64>, reason: impl ToString) -> ProcessingError {
    let error = ProcessingError::new(
        ErrorKind::MalformedRecord,
        format!("Malformed {what} payload: {}", reason.to_string()),
    );
    match id {
        Some(id) => error.with_context("id", id),
        None => error,
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_open_pull_request() {
        let pr = parse_pull_request(pull_request_json(42, "open", "2024-02-01T10:00:00Z")).unwrap();

        assert_eq!(pr.number, 42);
        assert_eq!(pr.state, PrState::Opened);
        assert_eq!(pr.author, "octocat");
        assert_eq!(pr.head_sha, "head042");
        assert_eq!(pr.labels, vec!["bug".to_string()]);
        assert_eq!(pr.raw_metadata["number"], 42);
    }

    #[test]
    fn closed_with_merge_timestamp_is_merged() {
        let mut value = pull_request_json(7, "closed", "2024-02-01T10:00:00Z");
        value["merged_at"] = json!("2024-02-01T10:00:00Z");
        assert_eq!(parse_pull_request(value).unwrap().state, PrState::Merged);

        let closed = pull_request_json(8, "closed", "2024-02-01T10:00:00Z");
        assert_eq!(parse_pull_request(closed).unwrap().state, PrState::Closed);
    }

    #[test]
    fn missing_user_becomes_ghost() {
        let mut value = pull_request_json(9, "open", "2024-02-01T10:00:00Z");
        value["user"] = Value::Null;
        assert_eq!(parse_pull_request(value).unwrap().author, "ghost");
    }

    #[test]
    fn rejects_pull_request_without_head() {
        let mut value = pull_request_json(3, "open", "2024-02-01T10:00:00Z");
        value.as_object_mut().unwrap().remove("head");

        let error = parse_pull_request(value).unwrap_err();
        assert_eq!(error.kind, ErrorKind::MalformedRecord);
        assert_eq!(error.context.get("id").map(String::as_str), Some("3"));
    }

    #[test]
    fn parses_check_run() {
        let check = parse_check_run(check_run_json(11, "completed", Some("failure"))).unwrap();

        assert_eq!(check.external_id, 11);
        assert_eq!(check.status, CheckStatus::Completed);
        assert_eq!(check.conclusion, Some(CheckConclusion::Failure));
        assert_eq!(check.check_suite_id, Some(900));
        assert_eq!(check.output_summary.as_deref(), Some("ok"));
        assert_eq!(
            check.logs_url.as_deref(),
            Some("https://github.com/acme/widgets/runs/11")
        );
    }

    #[test]
    fn rejects_unknown_check_status() {
        let error = parse_check_run(check_run_json(12, "exploded", None)).unwrap_err();
        assert_eq!(error.kind, ErrorKind::MalformedRecord);
    }

    #[test]
    fn unwraps_envelope() {
        let envelope = json!({
            "total_count": 2,
            "check_runs": [check_run_json(1, "queued", None), check_run_json(2, "queued", None)]
        });

        let (items, total) = unwrap_check_run_envelope(envelope).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(total, Some(2));
    }

    #[test]
    fn rejects_envelope_without_array() {
        let result = unwrap_check_run_envelope(json!({ "total_count": 0 }));
        assert!(result.is_err());
        assert!(unwrap_check_run_envelope(json!([])).is_err());
    }
}
