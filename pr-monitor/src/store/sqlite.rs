//! SQLite implementation of [`Store`].
//!
//! # Schema Versioning
//!
//! The `schema_version` table holds a single row with the current version.
//! Migrations run sequentially from the stored version up to
//! [`CURRENT_SCHEMA_VERSION`] when the database is opened.
//!
//! Timestamps are stored as RFC 3339 text, label and assignee lists as JSON
//! arrays.

use super::{Store, StoreError, WriteTx, WriteWork};
use crate::models::{
    sort_by_poll_priority, CheckConclusion, CheckRunRecord, CheckStatus, HistorySubject,
    NewRepository, PrRecord, PrState, StateHistoryEntry, StoredCheckRun, StoredPullRequest,
    StoredRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Current schema version.
const CURRENT_SCHEMA_VERSION: i64 = 2;

const REPOSITORY_COLUMNS: &str =
    "id, owner, name, is_active, polling_interval_minutes, priority, last_polled_at";

const PULL_REQUEST_COLUMNS: &str = "id, repository_id, number, title, author, state, draft, \
     base_branch, base_sha, head_branch, head_sha, url, body, labels, assignees, milestone, \
     created_at, last_updated_at, closed_at, merged_at";

const CHECK_RUN_COLUMNS: &str = "id, pull_request_id, external_id, name, status, conclusion, \
     check_suite_id, details_url, logs_url, output_title, output_summary, output_text, \
     started_at, completed_at";

/// Number of rows per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub repositories: usize,
    pub pull_requests: usize,
    pub check_runs: usize,
    pub state_history: usize,
}

/// SQLite-backed store.
///
/// All rusqlite calls run on `tokio::task::spawn_blocking` against one shared
/// connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies pending migrations.
    ///
    /// The connection runs with `journal_mode = WAL`, `busy_timeout = 5000`
    /// and foreign keys enforced.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file cannot be opened, the schema is
    /// newer than supported or a migration fails.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Opened database");
        Self::from_connection(conn)
    }

    /// Creates an empty in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".into(),
            source,
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        // In-memory databases report "memory" and stay that way.
        let _journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                found: from_version,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS repositories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner TEXT NOT NULL,
                    name TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    polling_interval_minutes INTEGER NOT NULL DEFAULT 15,
                    priority INTEGER NOT NULL DEFAULT 0,
                    last_polled_at TEXT,
                    UNIQUE (owner, name)
                );

                CREATE TABLE IF NOT EXISTS pull_requests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    repository_id INTEGER NOT NULL
                        REFERENCES repositories(id) ON DELETE CASCADE,
                    number INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    author TEXT NOT NULL,
                    state TEXT NOT NULL,
                    draft INTEGER NOT NULL,
                    base_branch TEXT NOT NULL,
                    base_sha TEXT NOT NULL,
                    head_branch TEXT NOT NULL,
                    head_sha TEXT NOT NULL,
                    url TEXT NOT NULL,
                    body TEXT,
                    labels TEXT NOT NULL DEFAULT '[]',
                    assignees TEXT NOT NULL DEFAULT '[]',
                    milestone TEXT,
                    created_at TEXT NOT NULL,
                    last_updated_at TEXT NOT NULL,
                    closed_at TEXT,
                    merged_at TEXT,
                    raw_metadata TEXT,
                    UNIQUE (repository_id, number)
                );

                CREATE TABLE IF NOT EXISTS check_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    pull_request_id INTEGER NOT NULL
                        REFERENCES pull_requests(id) ON DELETE CASCADE,
                    external_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    status TEXT NOT NULL,
                    conclusion TEXT,
                    check_suite_id INTEGER,
                    details_url TEXT,
                    logs_url TEXT,
                    output_title TEXT,
                    output_summary TEXT,
                    output_text TEXT,
                    started_at TEXT,
                    completed_at TEXT,
                    UNIQUE (pull_request_id, external_id)
                );

                CREATE INDEX IF NOT EXISTS idx_check_runs_pull_request
                    ON check_runs(pull_request_id);
                "#,
            )
            .map_err(|source| StoreError::Migration { version: 1, source })?;
        }

        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS state_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    subject TEXT NOT NULL,
                    subject_id INTEGER NOT NULL,
                    old_value TEXT,
                    new_value TEXT NOT NULL,
                    trigger_event TEXT NOT NULL,
                    recorded_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_state_history_subject
                    ON state_history(subject, subject_id);
                "#,
            )
            .map_err(|source| StoreError::Migration { version: 2, source })?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )?;
        debug!(
            from = from_version,
            to = CURRENT_SCHEMA_VERSION,
            "Applied schema migrations"
        );

        Ok(())
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Registers a repository and returns its id.
    pub async fn insert_repository(&self, repository: NewRepository) -> Result<i64, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO repositories (owner, name, is_active, polling_interval_minutes, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    repository.owner,
                    repository.name,
                    repository.is_active,
                    repository.polling_interval_minutes,
                    repository.priority
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Enables or disables monitoring of a repository.
    pub async fn set_repository_active(&self, id: i64, active: bool) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE repositories SET is_active = ?1 WHERE id = ?2",
                params![active, id],
            )?;
            if updated == 0 {
                return Err(StoreError::RowNotFound {
                    what: "repository",
                    id,
                });
            }
            Ok(())
        })
        .await
    }

    /// Counts the rows of every table.
    pub async fn row_counts(&self) -> Result<RowCounts, StoreError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<usize, StoreError> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                        row.get(0)
                    })?;
                Ok(n as usize)
            };
            Ok(RowCounts {
                repositories: count("repositories")?,
                pull_requests: count("pull_requests")?,
                check_runs: count("check_runs")?,
                state_history: count("state_history")?,
            })
        })
        .await
    }

    /// Returns the recorded transitions of one record, oldest first.
    pub async fn state_history(
        &self,
        subject: HistorySubject,
        subject_id: i64,
    ) -> Result<Vec<StateHistoryEntry>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT subject, subject_id, old_value, new_value, trigger_event, recorded_at
                 FROM state_history WHERE subject = ?1 AND subject_id = ?2 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![subject.as_str(), subject_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(subject, subject_id, old_value, new_value, trigger, recorded_at)| {
                    Ok(StateHistoryEntry {
                        subject: HistorySubject::from_name(&subject).ok_or(
                            StoreError::Corrupt {
                                table: "state_history",
                                column: "subject",
                                value: subject.clone(),
                            },
                        )?,
                        subject_id,
                        old_value,
                        new_value,
                        trigger,
                        recorded_at: parse_time("state_history", "recorded_at", &recorded_at)?,
                    })
                })
                .collect()
        })
        .await
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_repository_by_id(&self, id: i64) -> Result<Option<StoredRepository>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1"),
                params![id],
                RepositoryRow::read,
            )
            .optional()?
            .map(RepositoryRow::decode)
            .transpose()
        })
        .await
    }

    async fn get_active_repositories(&self) -> Result<Vec<StoredRepository>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE is_active = 1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([], RepositoryRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RepositoryRow::decode).collect()
        })
        .await
    }

    async fn get_repositories_needing_poll(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredRepository>, StoreError> {
        let mut due: Vec<StoredRepository> = self
            .get_active_repositories()
            .await?
            .into_iter()
            .filter(|r| r.is_due(now))
            .collect();
        sort_by_poll_priority(&mut due);
        Ok(due)
    }

    async fn get_pr_by_repo_and_number(
        &self,
        repository_id: i64,
        number: u64,
    ) -> Result<Option<StoredPullRequest>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {PULL_REQUEST_COLUMNS} FROM pull_requests
                     WHERE repository_id = ?1 AND number = ?2"
                ),
                params![repository_id, number as i64],
                PullRequestRow::read,
            )
            .optional()?
            .map(PullRequestRow::decode)
            .transpose()
        })
        .await
    }

    async fn get_check_runs_for_pr(
        &self,
        pull_request_id: i64,
    ) -> Result<Vec<StoredCheckRun>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHECK_RUN_COLUMNS} FROM check_runs WHERE pull_request_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![pull_request_id], CheckRunRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(CheckRunRow::decode).collect()
        })
        .await
    }

    async fn mark_repository_polled(
        &self,
        repository_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE repositories SET last_polled_at = ?1 WHERE id = ?2",
                params![at.to_rfc3339(), repository_id],
            )?;
            if updated == 0 {
                return Err(StoreError::RowNotFound {
                    what: "repository",
                    id: repository_id,
                });
            }
            Ok(())
        })
        .await
    }

    async fn write_transaction(&self, work: WriteWork) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let written = {
                let mut writer = SqliteWriteTx { conn: &tx };
                work(&mut writer)?
            };
            tx.commit()?;
            Ok(written)
        })
        .await
    }
}

/// [`WriteTx`] over an open rusqlite transaction.
///
/// Dropping the transaction without committing rolls it back.
struct SqliteWriteTx<'a> {
    conn: &'a Connection,
}

impl WriteTx for SqliteWriteTx<'_> {
    fn insert_pull_request(
        &mut self,
        repository_id: i64,
        pr: &PrRecord,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO pull_requests (
                 repository_id, number, title, author, state, draft,
                 base_branch, base_sha, head_branch, head_sha, url, body,
                 labels, assignees, milestone, created_at, last_updated_at,
                 closed_at, merged_at, raw_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                repository_id,
                pr.number as i64,
                pr.title,
                pr.author,
                pr.state.as_str(),
                pr.draft,
                pr.base_branch,
                pr.base_sha,
                pr.head_branch,
                pr.head_sha,
                pr.url,
                pr.body,
                serde_json::to_string(&pr.labels)?,
                serde_json::to_string(&pr.assignees)?,
                pr.milestone,
                pr.created_at.to_rfc3339(),
                pr.updated_at.to_rfc3339(),
                pr.closed_at.map(|t| t.to_rfc3339()),
                pr.merged_at.map(|t| t.to_rfc3339()),
                pr.raw_metadata.to_string(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_pull_request(&mut self, id: i64, pr: &PrRecord) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE pull_requests SET
                 title = ?2, author = ?3, state = ?4, draft = ?5,
                 base_branch = ?6, base_sha = ?7, head_branch = ?8, head_sha = ?9,
                 url = ?10, body = ?11, labels = ?12, assignees = ?13, milestone = ?14,
                 last_updated_at = ?15, closed_at = ?16, merged_at = ?17, raw_metadata = ?18
             WHERE id = ?1",
            params![
                id,
                pr.title,
                pr.author,
                pr.state.as_str(),
                pr.draft,
                pr.base_branch,
                pr.base_sha,
                pr.head_branch,
                pr.head_sha,
                pr.url,
                pr.body,
                serde_json::to_string(&pr.labels)?,
                serde_json::to_string(&pr.assignees)?,
                pr.milestone,
                pr.updated_at.to_rfc3339(),
                pr.closed_at.map(|t| t.to_rfc3339()),
                pr.merged_at.map(|t| t.to_rfc3339()),
                pr.raw_metadata.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::RowNotFound {
                what: "pull request",
                id,
            });
        }
        Ok(())
    }

    fn find_pull_request_id(
        &mut self,
        repository_id: i64,
        number: u64,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM pull_requests WHERE repository_id = ?1 AND number = ?2",
                params![repository_id, number as i64],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn insert_check_run(
        &mut self,
        pull_request_id: i64,
        check: &CheckRunRecord,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO check_runs (
                 pull_request_id, external_id, name, status, conclusion, check_suite_id,
                 details_url, logs_url, output_title, output_summary, output_text,
                 started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                pull_request_id,
                check.external_id as i64,
                check.name,
                check.status.as_str(),
                check.conclusion.map(|c| c.as_str()),
                check.check_suite_id.map(|id| id as i64),
                check.details_url,
                check.logs_url,
                check.output_title,
                check.output_summary,
                check.output_text,
                check.started_at.map(|t| t.to_rfc3339()),
                check.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_check_run(&mut self, id: i64, check: &CheckRunRecord) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE check_runs SET
                 name = ?2, status = ?3, conclusion = ?4, check_suite_id = ?5,
                 details_url = ?6, logs_url = ?7, output_title = ?8, output_summary = ?9,
                 output_text = ?10, started_at = ?11, completed_at = ?12
             WHERE id = ?1",
            params![
                id,
                check.name,
                check.status.as_str(),
                check.conclusion.map(|c| c.as_str()),
                check.check_suite_id.map(|id| id as i64),
                check.details_url,
                check.logs_url,
                check.output_title,
                check.output_summary,
                check.output_text,
                check.started_at.map(|t| t.to_rfc3339()),
                check.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::RowNotFound {
                what: "check run",
                id,
            });
        }
        Ok(())
    }

    fn append_state_history(&mut self, entry: &StateHistoryEntry) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO state_history (subject, subject_id, old_value, new_value, trigger_event, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.subject.as_str(),
                entry.subject_id,
                entry.old_value,
                entry.new_value,
                entry.trigger,
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

struct RepositoryRow {
    id: i64,
    owner: String,
    name: String,
    is_active: bool,
    polling_interval_minutes: u32,
    priority: i32,
    last_polled_at: Option<String>,
}

impl RepositoryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            is_active: row.get(3)?,
            polling_interval_minutes: row.get(4)?,
            priority: row.get(5)?,
            last_polled_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<StoredRepository, StoreError> {
        Ok(StoredRepository {
            id: self.id,
            owner: self.owner,
            name: self.name,
            is_active: self.is_active,
            polling_interval_minutes: self.polling_interval_minutes,
            priority: self.priority,
            last_polled_at: parse_optional_time(
                "repositories",
                "last_polled_at",
                self.last_polled_at,
            )?,
        })
    }
}

struct PullRequestRow {
    id: i64,
    repository_id: i64,
    number: i64,
    title: String,
    author: String,
    state: String,
    draft: bool,
    base_branch: String,
    base_sha: String,
    head_branch: String,
    head_sha: String,
    url: String,
    body: Option<String>,
    labels: String,
    assignees: String,
    milestone: Option<String>,
    created_at: String,
    last_updated_at: String,
    closed_at: Option<String>,
    merged_at: Option<String>,
}

impl PullRequestRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            repository_id: row.get(1)?,
            number: row.get(2)?,
            title: row.get(3)?,
            author: row.get(4)?,
            state: row.get(5)?,
            draft: row.get(6)?,
            base_branch: row.get(7)?,
            base_sha: row.get(8)?,
            head_branch: row.get(9)?,
            head_sha: row.get(10)?,
            url: row.get(11)?,
            body: row.get(12)?,
            labels: row.get(13)?,
            assignees: row.get(14)?,
            milestone: row.get(15)?,
            created_at: row.get(16)?,
            last_updated_at: row.get(17)?,
            closed_at: row.get(18)?,
            merged_at: row.get(19)?,
        })
    }

    fn decode(self) -> Result<StoredPullRequest, StoreError> {
        const TABLE: &str = "pull_requests";

        let state = PrState::from_name(&self.state).ok_or_else(|| StoreError::Corrupt {
            table: TABLE,
            column: "state",
            value: self.state.clone(),
        })?;

        Ok(StoredPullRequest {
            id: self.id,
            repository_id: self.repository_id,
            number: self.number as u64,
            title: self.title,
            author: self.author,
            state,
            draft: self.draft,
            base_branch: self.base_branch,
            base_sha: self.base_sha,
            head_branch: self.head_branch,
            head_sha: self.head_sha,
            url: self.url,
            body: self.body,
            labels: parse_list(TABLE, "labels", &self.labels)?,
            assignees: parse_list(TABLE, "assignees", &self.assignees)?,
            milestone: self.milestone,
            created_at: parse_time(TABLE, "created_at", &self.created_at)?,
            last_updated_at: parse_time(TABLE, "last_updated_at", &self.last_updated_at)?,
            closed_at: parse_optional_time(TABLE, "closed_at", self.closed_at)?,
            merged_at: parse_optional_time(TABLE, "merged_at", self.merged_at)?,
        })
    }
}

struct CheckRunRow {
    id: i64,
    pull_request_id: i64,
    external_id: i64,
    name: String,
    status: String,
    conclusion: Option<String>,
    check_suite_id: Option<i64>,
    details_url: Option<String>,
    logs_url: Option<String>,
    output_title: Option<String>,
    output_summary: Option<String>,
    output_text: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl CheckRunRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pull_request_id: row.get(1)?,
            external_id: row.get(2)?,
            name: row.get(3)?,
            status: row.get(4)?,
            conclusion: row.get(5)?,
            check_suite_id: row.get(6)?,
            details_url: row.get(7)?,
            logs_url: row.get(8)?,
            output_title: row.get(9)?,
            output_summary: row.get(10)?,
            output_text: row.get(11)?,
            started_at: row.get(12)?,
            completed_at: row.get(13)?,
        })
    }

    fn decode(self) -> Result<StoredCheckRun, StoreError> {
        const TABLE: &str = "check_runs";

        let status = CheckStatus::from_name(&self.status).ok_or_else(|| StoreError::Corrupt {
            table: TABLE,
            column: "status",
            value: self.status.clone(),
        })?;
        let conclusion = self
            .conclusion
            .map(|name| {
                CheckConclusion::from_name(&name).ok_or(StoreError::Corrupt {
                    table: TABLE,
                    column: "conclusion",
                    value: name,
                })
            })
            .transpose()?;

        Ok(StoredCheckRun {
            id: self.id,
            pull_request_id: self.pull_request_id,
            external_id: self.external_id as u64,
            name: self.name,
            status,
            conclusion,
            check_suite_id: self.check_suite_id.map(|id| id as u64),
            details_url: self.details_url,
            logs_url: self.logs_url,
            output_title: self.output_title,
            output_summary: self.output_summary,
            output_text: self.output_text,
            started_at: parse_optional_time(TABLE, "started_at", self.started_at)?,
            completed_at: parse_optional_time(TABLE, "completed_at", self.completed_at)?,
        })
    }
}

fn parse_time(
    table: &'static str,
    column: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            table,
            column,
            value: value.to_string(),
        })
}

fn parse_optional_time(
    table: &'static str,
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| parse_time(table, column, &v)).transpose()
}

fn parse_list(
    table: &'static str,
    column: &'static str,
    value: &str,
) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(value).map_err(|_| StoreError::Corrupt {
        table,
        column,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn pr(number: u64, title: &str) -> PrRecord {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
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
            body: Some("Body".to_string()),
            labels: vec!["bug".to_string()],
            assignees: vec!["hubot".to_string()],
            milestone: None,
            created_at: at,
            updated_at: at,
            closed_at: None,
            merged_at: None,
            raw_metadata: serde_json::json!({ "number": number }),
        }
    }

    fn check(id: u64) -> CheckRunRecord {
        CheckRunRecord {
            external_id: id,
            name: "build".to_string(),
            status: CheckStatus::Completed,
            conclusion: Some(CheckConclusion::Success),
            check_suite_id: Some(5),
            details_url: None,
            logs_url: None,
            output_title: None,
            output_summary: Some("ok".to_string()),
            output_text: None,
            started_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
            completed_at: None,
        }
    }

    #[test]
    fn creates_schema_at_current_version() {
        let store = SqliteStore::in_memory().unwrap();
        let conn = store.conn.lock().unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn reopening_keeps_data_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("monitor.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO repositories (owner, name) VALUES ('acme', 'widgets')",
                [],
            )
            .unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rejects_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            let conn = store.conn.lock().unwrap();
            conn.execute("UPDATE schema_version SET version = 99 WHERE id = 1", [])
                .unwrap();
        }

        let result = SqliteStore::new(&path);
        assert!(matches!(
            result,
            Err(StoreError::UnsupportedSchema { found: 99, .. })
        ));
    }

    #[tokio::test]
    async fn repository_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store
            .insert_repository(NewRepository::new("acme", "widgets").with_priority(3))
            .await
            .unwrap();

        let repo = store.get_repository_by_id(id).await.unwrap().unwrap();
        assert_eq!(repo.full_name(), "acme/widgets");
        assert_eq!(repo.priority, 3);
        assert!(repo.last_polled_at.is_none());

        let polled = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        store.mark_repository_polled(id, polled).await.unwrap();
        let repo = store.get_repository_by_id(id).await.unwrap().unwrap();
        assert_eq!(repo.last_polled_at, Some(polled));

        store.set_repository_active(id, false).await.unwrap();
        assert!(store.get_active_repositories().await.unwrap().is_empty());
        assert!(store.get_repository_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repositories_needing_poll_are_ordered() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let old = store
            .insert_repository(NewRepository::new("acme", "old").with_polling_interval(10))
            .await
            .unwrap();
        let fresh = store
            .insert_repository(NewRepository::new("acme", "fresh").with_polling_interval(60))
            .await
            .unwrap();
        let never = store
            .insert_repository(NewRepository::new("acme", "never"))
            .await
            .unwrap();
        let urgent = store
            .insert_repository(NewRepository::new("acme", "urgent").with_priority(9))
            .await
            .unwrap();
        store
            .insert_repository(NewRepository::new("acme", "off").inactive())
            .await
            .unwrap();

        store
            .mark_repository_polled(old, now - Duration::minutes(30))
            .await
            .unwrap();
        store
            .mark_repository_polled(fresh, now - Duration::minutes(30))
            .await
            .unwrap();

        let due: Vec<i64> = store
            .get_repositories_needing_poll(now)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(due, vec![urgent, never, old]);
    }

    #[tokio::test]
    async fn committed_writes_are_readable() {
        let store = SqliteStore::in_memory().unwrap();
        let repo = store
            .insert_repository(NewRepository::new("acme", "widgets"))
            .await
            .unwrap();

        let written = store
            .write_transaction(Box::new(move |tx| {
                let pr_id = tx.insert_pull_request(repo, &pr(42, "Fix"))?;
                tx.insert_check_run(pr_id, &check(7))?;
                Ok(2)
            }))
            .await
            .unwrap();
        assert_eq!(written, 2);

        let stored = store.get_pr_by_repo_and_number(repo, 42).await.unwrap().unwrap();
        assert_eq!(stored.title, "Fix");
        assert_eq!(stored.labels, vec!["bug".to_string()]);
        assert_eq!(stored.last_updated_at, pr(42, "Fix").updated_at);

        let checks = store.get_check_runs_for_pr(stored.id).await.unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].external_id, 7);
        assert_eq!(checks[0].conclusion, Some(CheckConclusion::Success));
    }

    #[tokio::test]
    async fn failed_work_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        let repo = store
            .insert_repository(NewRepository::new("acme", "widgets"))
            .await
            .unwrap();

        let result = store
            .write_transaction(Box::new(move |tx| {
                tx.insert_pull_request(repo, &pr(1, "One"))?;
                tx.update_pull_request(12345, &pr(2, "Two"))?;
                Ok(2)
            }))
            .await;

        assert!(matches!(
            result,
            Err(StoreError::RowNotFound {
                what: "pull request",
                ..
            })
        ));
        assert_eq!(store.row_counts().await.unwrap().pull_requests, 0);
    }

    #[tokio::test]
    async fn check_run_requires_existing_pull_request() {
        let store = SqliteStore::in_memory().unwrap();

        let result = store
            .write_transaction(Box::new(|tx| {
                tx.insert_check_run(777, &check(1))?;
                Ok(1)
            }))
            .await;

        assert!(matches!(result, Err(StoreError::Sqlite(_))));
    }

    #[tokio::test]
    async fn records_state_history() {
        let store = SqliteStore::in_memory().unwrap();
        let recorded_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let entry = StateHistoryEntry {
            subject: HistorySubject::PullRequest,
            subject_id: 4,
            old_value: Some("opened".to_string()),
            new_value: "merged".to_string(),
            trigger: "pr_state_changed".to_string(),
            recorded_at,
        };

        let cloned = entry.clone();
        store
            .write_transaction(Box::new(move |tx| {
                tx.append_state_history(&cloned)?;
                Ok(0)
            }))
            .await
            .unwrap();

        let history = store
            .state_history(HistorySubject::PullRequest, 4)
            .await
            .unwrap();
        assert_eq!(history, vec![entry]);
        assert_eq!(store.row_counts().await.unwrap().state_history, 1);
    }
}
