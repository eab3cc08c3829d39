//! Background sampling of process memory and CPU usage.

use super::session::ResourceMetrics;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Kernel clock ticks per second used by `/proc/self/stat`.
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// What the sampler observed over its lifetime.
#[derive(Debug, Clone, Default)]
pub struct ResourceReport {
    pub metrics: ResourceMetrics,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct MonitorState {
    metrics: ResourceMetrics,
    warnings: Vec<String>,
}

/// Periodic resource sampler running on its own tokio task.
///
/// Stop it with [`ResourceMonitor::stop`] to collect its report. Dropping it
/// cancels the sampler task without waiting for it.
pub struct ResourceMonitor {
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
    state: Arc<Mutex<MonitorState>>,
}

impl ResourceMonitor {
    /// Starts sampling every `interval`.
    ///
    /// Resident memory above `memory_limit_mb` is logged once and reported
    /// as a warning; processing is not interrupted.
    pub fn start(interval: Duration, memory_limit_mb: u64) -> Self {
        let shutdown = CancellationToken::new();
        let state = Arc::new(Mutex::new(MonitorState::default()));

        let handle = {
            let shutdown = shutdown.clone();
            let state = state.clone();
            tokio::spawn(async move {
                let mut ticker = time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut cpu = CpuTracker::new();
                let mut over_limit = false;

                loop {
                    select! {
                        _ = shutdown.cancelled() => {
                            debug!("Resource monitor shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            let Some(memory_mb) = read_resident_memory_mb() else {
                                continue;
                            };
                            let cpu_percent = cpu.sample().unwrap_or(0.0);

                            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                            state.metrics.record(memory_mb, cpu_percent);

                            if memory_mb > memory_limit_mb as f64 && !over_limit {
                                over_limit = true;
                                warn!(
                                    memory_mb = format!("{memory_mb:.1}"),
                                    limit_mb = memory_limit_mb,
                                    "Memory usage exceeds configured limit"
                                );
                                state.warnings.push(format!(
                                    "Memory usage {memory_mb:.1} MB exceeded limit of {memory_limit_mb} MB"
                                ));
                            }
                        }
                    }
                }
            })
        };

        Self {
            shutdown,
            handle: Some(handle),
            state,
        }
    }

    /// Returns the metrics gathered so far.
    #[must_use]
    pub fn snapshot(&self) -> ResourceMetrics {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .metrics
            .clone()
    }

    /// Stops the sampler and waits for its task to exit.
    pub async fn stop(mut self) -> ResourceReport {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Resource monitor task failed");
            }
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ResourceReport {
            metrics: std::mem::take(&mut state.metrics),
            warnings: std::mem::take(&mut state.warnings),
        }
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Converts successive CPU time readings into a utilisation percentage.
struct CpuTracker {
    last: Option<(f64, Instant)>,
}

impl CpuTracker {
    fn new() -> Self {
        Self { last: None }
    }

    fn sample(&mut self) -> Option<f64> {
        let cpu_secs = read_cpu_seconds()?;
        let now = Instant::now();
        let percent = self.last.map(|(last_cpu, last_at)| {
            let wall = now.duration_since(last_at).as_secs_f64();
            if wall <= f64::EPSILON {
                0.0
            } else {
                ((cpu_secs - last_cpu) / wall * 100.0).max(0.0)
            }
        });
        self.last = Some((cpu_secs, now));
        percent
    }
}

/// Resident set size from `/proc/self/status`.
fn read_resident_memory_mb() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_kb(&status).map(|kb| kb as f64 / 1024.0)
}

/// User plus system CPU time from `/proc/self/stat`.
fn read_cpu_seconds() -> Option<f64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    parse_cpu_ticks(&stat).map(|ticks| ticks as f64 / CLOCK_TICKS_PER_SEC)
}

fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    // The command name may contain spaces; fields resume after its closing paren.
    let fields: Vec<&str> = stat.rsplit_once(')')?.1.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}
