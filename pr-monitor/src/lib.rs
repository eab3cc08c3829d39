#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

pub mod config;
pub mod detection;
pub mod discovery;
pub mod github;
pub mod models;
pub mod processor;
pub mod rate_limit;
pub mod store;
pub mod summary;
pub mod sync;

pub use config::{ConfigError, ProcessorConfig};
pub use detection::{
    analyze_significance, create_change_set, detect_check_run_changes, detect_pr_changes,
    filter_actionable_changes, is_actionable, ChangeDetector, ChangeEvent, ChangeSet, ChangeType,
    DetectionError, EventType, Severity, SEVERITY_RULES,
};
pub use discovery::{ChecksByPr, DiscoveryCache, DiscoveryEngine, DiscoveryLimits};
pub use github::{GitHubApi, GitHubError, ListPage, OctocrabApi, PullListQuery};
pub use models::{
    CheckConclusion, CheckRunRecord, CheckStatus, NewRepository, PrRecord, PrState,
    RepositoryContext, StoredCheckRun, StoredPullRequest, StoredRepository,
};
pub use processor::{
    ProcessingMode, ProcessingPhase, ProcessingSession, ProcessingStatus, Processor,
    ProcessorContext, ProcessorError,
};
pub use rate_limit::{check_core_rate_limit, ensure_core_rate_limit, wait_if_needed, RateLimitInfo};
pub use store::{SqliteStore, Store, StoreError, WriteTx};
pub use summary::{BatchProcessingResult, ErrorKind, ProcessingError, ProcessingResult};
pub use sync::{DataSynchronizer, SyncError};
