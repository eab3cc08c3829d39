//! Orchestrates monitoring sessions across a repository fleet.
//!
//! A session selects repositories, runs discovery, detection and
//! synchronization for each of them in concurrent batches, and aggregates the
//! per-repository [`ProcessingResult`]s into a [`BatchProcessingResult`].

mod error;
mod monitor;
mod session;
mod status;

pub use error::ProcessorError;
pub use monitor::{ResourceMonitor, ResourceReport};
pub use session::{
    PhaseTransition, ProcessingMode, ProcessingPhase, ProcessingSession, ResourceMetrics,
};
pub use status::{ActivityStatus, MetricsStatus, ProcessingStatus, ProgressStatus};

use crate::config::ProcessorConfig;
use crate::detection::{filter_actionable_changes, ChangeDetector};
use crate::discovery::{api_states, DiscoveryCache, DiscoveryEngine, DiscoveryLimits};
use crate::github::GitHubApi;
use crate::models::{sort_by_poll_priority, RepositoryContext, StoredRepository};
use crate::store::Store;
use crate::summary::{
    BatchProcessingResult, ErrorKind, ProcessingError, ProcessingResult, ResultBuilder,
};
use crate::sync::DataSynchronizer;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Everything a [`Processor`] needs, constructed by the caller.
#[derive(Clone)]
pub struct ProcessorContext {
    pub config: ProcessorConfig,
    pub github: Arc<dyn GitHubApi>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<DiscoveryCache>,
}

impl ProcessorContext {
    /// Creates a context with a discovery cache sized from `config`.
    pub fn new(config: ProcessorConfig, github: Arc<dyn GitHubApi>, store: Arc<dyn Store>) -> Self {
        let cache = Arc::new(DiscoveryCache::new(config.cache_ttl()));
        Self {
            config,
            github,
            store,
            cache,
        }
    }
}

/// Runs monitoring sessions.
///
/// One processor runs at most one session at a time.
pub struct Processor {
    config: ProcessorConfig,
    store: Arc<dyn Store>,
    cache: Arc<DiscoveryCache>,
    discovery: DiscoveryEngine,
    detector: ChangeDetector,
    synchronizer: DataSynchronizer,
    repo_limiter: Arc<Semaphore>,
    shutdown: CancellationToken,
    running: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    live: Mutex<Option<ProcessingSession>>,
}

impl Processor {
    /// Validates the configuration and wires the pipeline components.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Config`] if the configuration is invalid.
    pub fn new(ctx: ProcessorContext) -> Result<Self, ProcessorError> {
        ctx.config.validate()?;

        let limits = DiscoveryLimits::new(
            ctx.config.max_concurrent_api_calls,
            ctx.config.max_concurrent_check_discoveries,
        );
        let discovery = DiscoveryEngine::new(
            ctx.github,
            limits,
            ctx.cache.clone(),
            ctx.config.max_pages_per_query,
        );

        Ok(Self {
            repo_limiter: Arc::new(Semaphore::new(ctx.config.max_concurrent_repos)),
            detector: ChangeDetector::new(ctx.store.clone()),
            synchronizer: DataSynchronizer::new(ctx.store.clone(), ctx.config.sync_chunk_size),
            discovery,
            store: ctx.store,
            cache: ctx.cache,
            config: ctx.config,
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            live: Mutex::new(None),
        })
    }

    /// Returns the validated configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Asks the running session to stop after its current batch.
    ///
    /// The request is permanent: later sessions stop before their first batch.
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Returns a snapshot of the running session, or an idle status.
    #[must_use]
    pub fn processing_status(&self) -> ProcessingStatus {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        match live.as_ref() {
            Some(session) => ProcessingStatus::active(session),
            None => ProcessingStatus::idle(),
        }
    }

    /// Processes a set of repositories in one session.
    ///
    /// With `ids`, exactly those repositories are processed. Otherwise
    /// [`ProcessingMode::Incremental`] picks repositories due for polling and
    /// the other modes pick every active repository.
    ///
    /// # Errors
    ///
    /// - [`ProcessorError::AlreadyRunning`] if a session is in progress.
    /// - [`ProcessorError::SessionFailed`] if the session failed after it
    ///   started. It carries the finalized session (phase `FAILED`, recovery
    ///   metrics) and the results gathered so far; the underlying error is one
    ///   of [`ProcessorError::UnknownRepository`], [`ProcessorError::Store`]
    ///   or [`ProcessorError::Aborted`] (a repository failed and
    ///   `stop_on_first_error` is set).
    ///
    /// Per-repository failures are reported in the returned results instead.
    pub async fn process_repositories(
        &self,
        ids: Option<&[i64]>,
        mode: ProcessingMode,
    ) -> Result<BatchProcessingResult, ProcessorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Rejected concurrent processing request");
            return Err(ProcessorError::AlreadyRunning);
        }
        let _guard = SessionGuard {
            running: &self.running,
            live: &self.live,
        };

        let mut session = ProcessingSession::new(mode);
        let span = info_span!("session", id = %session.id, mode = %mode);
        self.peak_in_flight.store(0, Ordering::SeqCst);
        self.publish(&session);

        let monitor = ResourceMonitor::start(
            self.config.resource_sample_interval(),
            self.config.memory_limit_mb,
        );
        let mut results = Vec::new();

        let outcome = self
            .run_session(&mut session, ids, &mut results, &monitor)
            .instrument(span.clone())
            .await;

        match outcome {
            Ok(()) => {
                self.cleanup(&mut session, monitor).instrument(span).await;
                session.transition_to(ProcessingPhase::Completed)?;

                info!(
                    session = %session.id,
                    processed = session.repositories_processed,
                    succeeded = session.repositories_succeeded,
                    failed = session.repositories_failed,
                    changes = session.changes_synchronized,
                    duration_secs = session.duration().as_secs_f64(),
                    "Session completed"
                );
                Ok(BatchProcessingResult { session, results })
            }
            Err(e) => {
                error!(session = %session.id, phase = %session.phase, error = %e, "Session failed");
                session
                    .errors
                    .push(ProcessingError::new(phase_error_kind(session.phase), e.to_string()));

                // Single recovery attempt: salvage metrics through cleanup.
                session.recovery_attempted = true;
                self.cleanup(&mut session, monitor).instrument(span).await;
                if let Err(transition) = session.transition_to(ProcessingPhase::Failed) {
                    warn!(error = %transition, "Could not mark session as failed");
                }
                Err(ProcessorError::SessionFailed {
                    partial: Box::new(BatchProcessingResult { session, results }),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Processes one repository outside of a session.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::UnknownRepository`] if `id` does not exist.
    /// Phase failures are reported in the result.
    pub async fn process_single_repository(
        &self,
        id: i64,
        since: Option<DateTime<Utc>>,
        dry_run: bool,
    ) -> Result<ProcessingResult, ProcessorError> {
        let repository = self
            .store
            .get_repository_by_id(id)
            .await?
            .ok_or(ProcessorError::UnknownRepository(id))?;

        Ok(self
            .process_repository(repository.context(), since, dry_run)
            .await)
    }

    async fn run_session(
        &self,
        session: &mut ProcessingSession,
        ids: Option<&[i64]>,
        results: &mut Vec<ProcessingResult>,
        monitor: &ResourceMonitor,
    ) -> Result<(), ProcessorError> {
        let mode = session.mode;
        let repositories = self.select_repositories(ids, mode).await?;
        session.total_repositories = repositories.len();
        info!(count = repositories.len(), "Selected repositories");

        if mode == ProcessingMode::Full {
            self.cache.clear();
        }

        session.transition_to(ProcessingPhase::Discovery)?;
        self.publish(session);

        let mut succeeded: Vec<i64> = Vec::new();
        let mut timeout_reported = false;
        let batch_size = self.config.batch_size;
        let batch_count = repositories.len().div_ceil(batch_size);

        for (index, batch) in repositories.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.inter_batch_delay()).await;
            }
            if self.shutdown.is_cancelled() {
                let remaining = repositories.len() - index * batch_size;
                warn!(remaining, "Stopping before next batch due to shutdown request");
                session.add_warning(format!(
                    "Shutdown requested; {remaining} repositories not processed"
                ));
                break;
            }

            debug!(batch = index + 1, of = batch_count, size = batch.len(), "Processing batch");
            let batch_results = self.process_batch(batch, mode).await;

            let mut first_failure = None;
            for result in batch_results {
                session.record_result(&result);
                if result.success {
                    succeeded.push(result.repository_id);
                } else if first_failure.is_none() {
                    first_failure = Some(result.repository.clone());
                }
                results.push(result);
            }
            session.peak_in_flight = self.peak_in_flight.load(Ordering::SeqCst);
            session.resources = monitor.snapshot();

            if !timeout_reported && session.duration() > self.config.session_timeout() {
                timeout_reported = true;
                warn!(
                    timeout_secs = self.config.session_timeout_secs,
                    "Session exceeded its time ceiling"
                );
                session.add_warning(format!(
                    "Session exceeded {}s time ceiling",
                    self.config.session_timeout_secs
                ));
            }
            self.publish(session);

            if let Some(repository) = first_failure {
                if self.config.stop_on_first_error {
                    return Err(ProcessorError::Aborted { repository });
                }
            }
        }

        session.transition_to(ProcessingPhase::ChangeDetection)?;
        self.publish(session);
        info!(
            changes = session.changes_detected,
            actionable = session.actionable_events,
            "Aggregated change detection"
        );

        if !mode.is_dry_run() {
            session.transition_to(ProcessingPhase::Synchronization)?;
            self.publish(session);

            let polled_at = Utc::now();
            for id in succeeded {
                if let Err(e) = self.store.mark_repository_polled(id, polled_at).await {
                    warn!(repository_id = id, error = %e, "Failed to record poll time");
                    session.add_warning(format!("Failed to record poll time for {id}: {e}"));
                }
            }
        }

        Ok(())
    }

    async fn select_repositories(
        &self,
        ids: Option<&[i64]>,
        mode: ProcessingMode,
    ) -> Result<Vec<StoredRepository>, ProcessorError> {
        if let Some(ids) = ids {
            let mut selected = Vec::with_capacity(ids.len());
            for &id in ids {
                let repository = self
                    .store
                    .get_repository_by_id(id)
                    .await?
                    .ok_or(ProcessorError::UnknownRepository(id))?;
                selected.push(repository);
            }
            return Ok(selected);
        }

        match mode {
            ProcessingMode::Incremental => {
                Ok(self.store.get_repositories_needing_poll(Utc::now()).await?)
            }
            ProcessingMode::Full | ProcessingMode::DryRun => {
                let mut active = self.store.get_active_repositories().await?;
                sort_by_poll_priority(&mut active);
                Ok(active)
            }
        }
    }

    async fn process_batch(
        &self,
        batch: &[StoredRepository],
        mode: ProcessingMode,
    ) -> Vec<ProcessingResult> {
        stream::iter(batch)
            .map(|repository| async move {
                let since = match mode {
                    ProcessingMode::Incremental => repository.last_polled_at,
                    ProcessingMode::Full | ProcessingMode::DryRun => None,
                };

                let _permit = self.repo_limiter.acquire().await;
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

                let result = self
                    .process_repository(repository.context(), since, mode.is_dry_run())
                    .await;

                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            })
            .buffer_unordered(self.config.max_concurrent_repos)
            .collect()
            .await
    }

    /// Runs discovery, detection and synchronization for one repository.
    ///
    /// Never fails: phase failures are converted into the result.
    async fn process_repository(
        &self,
        repo: RepositoryContext,
        since: Option<DateTime<Utc>>,
        dry_run: bool,
    ) -> ProcessingResult {
        let span = info_span!("repository", repo = %repo.full_name, id = repo.id);

        async {
            let mut builder = ResultBuilder::new(&repo);
            debug!(?since, dry_run, "Processing repository");

            let (prs, pr_errors) = self
                .discovery
                .discover_prs(&repo, &self.config.pr_states, since)
                .await;

            if prs.is_empty() && all_listings_failed(&self.config, &pr_errors) {
                warn!(errors = pr_errors.len(), "Discovery failed");
                builder.record_errors(pr_errors);
                return builder.fail(ErrorKind::DiscoveryFailure);
            }

            let (checks_by_pr, check_errors) = self
                .discovery
                .discover_check_runs_for_prs(&repo, &prs)
                .await;
            let check_count = checks_by_pr.values().map(Vec::len).sum();
            builder.discovered(prs.len(), check_count);
            builder.record_errors(pr_errors);
            builder.record_errors(check_errors);

            let change_set = match self
                .detector
                .detect_repository_changes(repo.id, &prs, &checks_by_pr)
                .await
            {
                Ok(change_set) => change_set,
                Err(e) => {
                    warn!(error = %e, "Change detection failed");
                    builder.record_errors([ProcessingError::new(
                        ErrorKind::ChangeDetectionFailure,
                        e.to_string(),
                    )
                    .with_context("repository", &repo.full_name)]);
                    return builder.fail(ErrorKind::ChangeDetectionFailure);
                }
            };

            let actionable = filter_actionable_changes(change_set.events().cloned().collect());
            builder.detected(change_set.total_changes(), actionable);

            if dry_run || !change_set.has_changes() {
                return builder.succeed();
            }

            match self.synchronizer.synchronize_changes(repo.id, change_set).await {
                Ok(applied) => {
                    builder.synchronized(applied);
                    builder.succeed()
                }
                Err(e) => {
                    let evicted = self.cache.invalidate_repository(repo.id);
                    debug!(evicted, "Invalidated discovery cache after failed synchronization");
                    builder.record_errors([ProcessingError::new(
                        ErrorKind::SynchronizationFailure,
                        e.to_string(),
                    )
                    .with_context("repository", &repo.full_name)]);
                    builder.fail(ErrorKind::SynchronizationFailure)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn cleanup(&self, session: &mut ProcessingSession, monitor: ResourceMonitor) {
        if session.phase != ProcessingPhase::Cleanup {
            if let Err(e) = session.transition_to(ProcessingPhase::Cleanup) {
                warn!(error = %e, "Could not enter cleanup phase");
            }
        }

        let report = monitor.stop().await;
        session.resources = report.metrics;
        for warning in report.warnings {
            session.add_warning(warning);
        }
        session.peak_in_flight = self.peak_in_flight.load(Ordering::SeqCst);

        debug!(
            samples = session.resources.samples,
            peak_memory_mb = session.resources.peak_memory_mb,
            peak_in_flight = session.peak_in_flight,
            "Cleanup finished"
        );
    }

    fn publish(&self, session: &ProcessingSession) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
    }

}

/// Clears the running flag and the live status when a session ends, however
/// it ends (including when the session future is dropped).
struct SessionGuard<'a> {
    running: &'a AtomicBool,
    live: &'a Mutex<Option<ProcessingSession>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Whether every pull request listing of a discovery pass failed.
fn all_listings_failed(config: &ProcessorConfig, errors: &[ProcessingError]) -> bool {
    let listing_errors = errors
        .iter()
        .filter(|e| matches!(e.kind, ErrorKind::NotFound | ErrorKind::ApiError))
        .filter_map(|e| e.context.get("state").map(|state| (e.kind, state.as_str())));

    let mut failed_states = HashSet::new();
    for (kind, state) in listing_errors {
        if kind == ErrorKind::NotFound {
            return true;
        }
        failed_states.insert(state);
    }

    !failed_states.is_empty() && failed_states.len() >= api_states(&config.pr_states).len()
}

fn phase_error_kind(phase: ProcessingPhase) -> ErrorKind {
    match phase {
        ProcessingPhase::ChangeDetection => ErrorKind::ChangeDetectionFailure,
        ProcessingPhase::Synchronization | ProcessingPhase::Cleanup => {
            ErrorKind::SynchronizationFailure
        }
        ProcessingPhase::Initialization
        | ProcessingPhase::Discovery
        | ProcessingPhase::Completed
        | ProcessingPhase::Failed => ErrorKind::DiscoveryFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_error(kind: ErrorKind, state: &str) -> ProcessingError {
        ProcessingError::new(kind, "boom").with_context("state", state)
    }

    #[test]
    fn single_failed_listing_fails_discovery() {
        let config = ProcessorConfig::default();
        assert!(all_listings_failed(
            &config,
            &[listing_error(ErrorKind::ApiError, "open")]
        ));
    }

    #[test]
    fn partial_listing_failure_is_not_a_phase_failure() {
        let config = ProcessorConfig {
            pr_states: vec![crate::models::PrState::Opened, crate::models::PrState::Merged],
            ..ProcessorConfig::default()
        };
        assert!(!all_listings_failed(
            &config,
            &[listing_error(ErrorKind::ApiError, "open")]
        ));
        assert!(all_listings_failed(
            &config,
            &[
                listing_error(ErrorKind::ApiError, "open"),
                listing_error(ErrorKind::ApiError, "closed"),
            ]
        ));
    }

    #[test]
    fn not_found_fails_discovery() {
        let config = ProcessorConfig::default();
        assert!(all_listings_failed(
            &config,
            &[listing_error(ErrorKind::NotFound, "open")]
        ));
    }

    #[test]
    fn malformed_records_do_not_fail_discovery() {
        let config = ProcessorConfig::default();
        let malformed = ProcessingError::new(ErrorKind::MalformedRecord, "bad");
        assert!(!all_listings_failed(&config, &[malformed]));
    }

    #[test]
    fn session_guard_resets_flag_and_status() {
        let running = AtomicBool::new(true);
        let live = Mutex::new(Some(ProcessingSession::new(ProcessingMode::Full)));
        drop(SessionGuard {
            running: &running,
            live: &live,
        });

        assert!(!running.load(Ordering::SeqCst));
        assert!(live.lock().unwrap().is_none());
    }
}
