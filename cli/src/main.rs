//! CLI for the PR monitor.
//!
//! Registers repositories and runs monitoring sessions against them, storing
//! pull request and check run state in a local SQLite database.

use clap::{Parser, Subcommand, ValueEnum};
use pr_monitor::{
    BatchProcessingResult, NewRepository, OctocrabApi, ProcessingMode, Processor,
    ProcessorConfig, ProcessorContext, ProcessorError, SqliteStore,
};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// PR Monitor - Track pull request and check run activity across GitHub repositories.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database.
    #[arg(long, env = "PR_MONITOR_DATABASE", default_value = "pr-monitor.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one monitoring session.
    Run {
        /// GitHub Personal Access Token.
        #[arg(long, env = "GITHUB_TOKEN")]
        token: String,

        /// Path to processor.toml; defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Processing mode.
        #[arg(long, value_enum, default_value_t = Mode::Incremental)]
        mode: Mode,

        /// Only process these repository ids.
        #[arg(long = "repository", value_name = "ID")]
        repositories: Vec<i64>,
    },

    /// Register a repository for monitoring.
    Add {
        /// Repository in `owner/name` form.
        full_name: String,

        /// Minutes between two incremental polls.
        #[arg(long, default_value_t = 15)]
        polling_interval: u32,

        /// Higher values are polled first.
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Full,
    Incremental,
    DryRun,
}

impl From<Mode> for ProcessingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Full => ProcessingMode::Full,
            Mode::Incremental => ProcessingMode::Incremental,
            Mode::DryRun => ProcessingMode::DryRun,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    // octocrab's TLS stack needs a process-wide crypto provider. An error
    // means one is already installed.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();

    match args.command {
        Command::Add {
            full_name,
            polling_interval,
            priority,
        } => match add_repository(args.database, &full_name, polling_interval, priority).await {
            Ok(id) => {
                println!("Registered {full_name} with id {id}");
                ExitCode::from(0)
            }
            Err(e) => {
                error!(error = %e, "Failed to register repository");
                ExitCode::from(2)
            }
        },
        Command::Run {
            token,
            config,
            mode,
            repositories,
        } => match run(args.database, token, config, mode.into(), repositories).await {
            Ok(batch) => {
                print_summary(&batch);

                if batch.failures().next().is_some() || !batch.session.errors.is_empty() {
                    ExitCode::from(1)
                } else {
                    ExitCode::from(0)
                }
            }
            Err(e) => {
                if let Some(partial) = e
                    .downcast_ref::<ProcessorError>()
                    .and_then(ProcessorError::partial)
                {
                    print_summary(partial);
                }
                error!(error = %e, "Critical failure");
                ExitCode::from(2)
            }
        },
    }
}

/// Initializes tracing with environment filter support.
///
/// Sets up the global tracing subscriber with:
/// - Compact log formatting (single-line output)
/// - Log level filtering via `RUST_LOG` env var (defaults to "info")
fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

async fn add_repository(
    database: PathBuf,
    full_name: &str,
    polling_interval: u32,
    priority: i32,
) -> CliResult<i64> {
    let (owner, name) = full_name
        .split_once('/')
        .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
        .ok_or_else(|| format!("Expected `owner/name`, got `{full_name}`"))?;

    let store = SqliteStore::new(&database)?;
    let repository = NewRepository::new(owner, name)
        .with_polling_interval(polling_interval)
        .with_priority(priority);
    Ok(store.insert_repository(repository).await?)
}

/// Main execution logic.
async fn run(
    database: PathBuf,
    token: String,
    config: Option<PathBuf>,
    mode: ProcessingMode,
    repositories: Vec<i64>,
) -> CliResult<BatchProcessingResult> {
    let config = match config {
        Some(path) => ProcessorConfig::load(&path)?,
        None => ProcessorConfig::default(),
    };

    let github = Arc::new(OctocrabApi::from_token(token)?);
    let store = Arc::new(SqliteStore::new(&database)?);
    let processor = Arc::new(Processor::new(ProcessorContext::new(config, github, store))?);

    // Ctrl-C stops the session after the batch in flight.
    let interrupt = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, finishing the current batch");
                processor.request_shutdown();
            }
        })
    };

    info!(database = %database.display(), mode = %mode, "Starting session");
    let ids = (!repositories.is_empty()).then_some(repositories.as_slice());
    let outcome = processor.process_repositories(ids, mode).await;
    interrupt.abort();
    Ok(outcome?)
}

/// Prints the final session summary.
fn print_summary(batch: &BatchProcessingResult) {
    let session = &batch.session;
    println!("\nSummary:");
    println!("  Session: {}", session.id);
    println!("  Mode: {}", session.mode);
    println!("  Repositories processed: {}", batch.repositories_processed());
    println!("  Success rate: {:.1}%", batch.success_rate() * 100.0);
    println!("  Pull requests discovered: {}", session.prs_discovered);
    println!("  Check runs discovered: {}", session.check_runs_discovered);
    println!("  Changes detected: {}", session.changes_detected);
    if !session.mode.is_dry_run() {
        println!("  Changes synchronized: {}", session.changes_synchronized);
    }
    println!("  Actionable events: {}", session.actionable_events);
    println!("  Errors: {}", batch.total_errors());
    println!("  Duration: {:.2}s", session.duration().as_secs_f64());

    for result in batch.failures() {
        let phase = result
            .failed_phase
            .map_or("unknown", |kind| kind.as_str());
        println!("  FAILED {} ({phase})", result.repository);
        for err in &result.errors {
            println!("    - {err}");
        }
    }
    for warning in &session.warnings {
        println!("  Warning: {warning}");
    }
}
