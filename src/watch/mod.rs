//! Debounced trigger loop driving the pipeline.
//!
//! Triggers arrive on a channel (from [`fs::RepoWatcher`] in production).
//! A burst of triggers settles into one run once the channel has been quiet
//! for the debounce window. Runs never overlap: a trigger that arrives while
//! a run is in flight leaves exactly one follow-up run pending.

pub mod fs;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::pipeline::{CycleReport, Pipeline, RunMode};
use crate::vcs::VcsWrite;

pub use fs::RepoWatcher;

/// Consecutive automatic retries after retryable failures.
pub const MAX_RETRIES: u32 = 3;
const RETRY_INITIAL_INTERVAL_SECS: u64 = 1;
const RETRY_MAX_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Quiet window before a burst of triggers starts a run.
    pub debounce: Duration,
    /// How long a graceful stop waits for the in-flight run.
    pub hard_stop: Duration,
    pub mode: RunMode,
    pub max_retries: u32,
    pub retry_initial_interval: Duration,
    pub retry_max_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(crate::config::DEFAULT_DEBOUNCE_MS),
            hard_stop: Duration::from_millis(crate::config::DEFAULT_HARD_STOP_MS),
            mode: RunMode::Apply,
            max_retries: MAX_RETRIES,
            retry_initial_interval: Duration::from_secs(RETRY_INITIAL_INTERVAL_SECS),
            retry_max_interval: Duration::from_secs(RETRY_MAX_INTERVAL_SECS),
        }
    }
}

/// Exclusive access to a repository's pipeline.
///
/// Whoever holds the guard is the only one reading or writing the repository
/// through this pipeline; cloning shares the same lock.
pub struct PipelineLock<B> {
    inner: Arc<Mutex<Pipeline<B>>>,
}

impl<B> Clone for PipelineLock<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: VcsWrite> PipelineLock<B> {
    pub fn new(pipeline: Pipeline<B>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pipeline)),
        }
    }

    /// Run one cycle while holding the lock. Blocks until the lock is free.
    pub fn run(&self, mode: RunMode, cancel: &CancellationToken) -> CycleReport {
        let mut pipeline = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pipeline.run(mode, cancel)
    }

    /// Inspect the pipeline (and its backend) under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&Pipeline<B>) -> R) -> R {
        let pipeline = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&pipeline)
    }
}

/// Totals for a finished loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub commits: u64,
    /// The hard-stop deadline cut off an in-flight run.
    pub abandoned: bool,
}

impl LoopSummary {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.commits += report.result.applied.len() as u64;
        if !report.result.is_success() {
            self.failed_cycles += 1;
        }
    }
}

pub struct TriggerLoop<B> {
    lock: PipelineLock<B>,
    config: WatchConfig,
}

impl<B: VcsWrite + Send + 'static> TriggerLoop<B> {
    pub fn new(lock: PipelineLock<B>, config: WatchConfig) -> Self {
        Self { lock, config }
    }

    /// Run until `shutdown` fires, or until the trigger channel closes and
    /// no run is in flight or scheduled.
    ///
    /// `on_report` sees every cycle's report, including the `Abandoned` one
    /// produced when the hard-stop deadline cuts off a run.
    pub async fn run<F>(
        self,
        mut triggers: UnboundedReceiver<()>,
        shutdown: CancellationToken,
        mut on_report: F,
    ) -> LoopSummary
    where
        F: FnMut(&CycleReport),
    {
        let mut summary = LoopSummary::default();
        let run_cancel = CancellationToken::new();
        let mut backoff = self.new_backoff();

        let mut deadline: Option<Instant> = None;
        let mut in_flight: Option<JoinHandle<CycleReport>> = None;
        let mut pending = false;
        let mut retries = 0u32;
        let mut channel_open = true;

        loop {
            if !channel_open && in_flight.is_none() && deadline.is_none() {
                debug!("Trigger channel closed and loop idle, stopping");
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                joined = join_in_flight(&mut in_flight) => {
                    in_flight = None;
                    let report = unwrap_join(joined, self.config.mode);
                    summary.record(&report);
                    on_report(&report);

                    if report.result.is_success() {
                        retries = 0;
                        backoff.reset();
                    }

                    if pending {
                        pending = false;
                        deadline = Some(Instant::now() + self.config.debounce);
                    } else if report.result.has_retryable_failure() {
                        if retries < self.config.max_retries {
                            retries += 1;
                            let wait = backoff
                                .next_backoff()
                                .unwrap_or(self.config.retry_max_interval);
                            info!(
                                "Retrying in {:?} (attempt {}/{})",
                                wait, retries, self.config.max_retries
                            );
                            deadline = Some(Instant::now() + wait);
                        } else {
                            warn!(
                                "Giving up after {} retries; waiting for new changes",
                                retries
                            );
                        }
                    }
                }

                msg = triggers.recv(), if channel_open => match msg {
                    Some(()) => {
                        if in_flight.is_some() {
                            pending = true;
                        } else {
                            deadline = Some(Instant::now() + self.config.debounce);
                        }
                    }
                    None => channel_open = false,
                },

                _ = sleep_until_deadline(deadline), if in_flight.is_none() => {
                    deadline = None;
                    debug!("Triggers settled, starting run");
                    let lock = self.lock.clone();
                    let cancel = run_cancel.clone();
                    let mode = self.config.mode;
                    in_flight = Some(tokio::task::spawn_blocking(move || lock.run(mode, &cancel)));
                }
            }
        }

        if let Some(handle) = in_flight {
            debug!(
                "Stopping: waiting up to {:?} for the in-flight run",
                self.config.hard_stop
            );
            match tokio::time::timeout(self.config.hard_stop, handle).await {
                Ok(joined) => {
                    let report = unwrap_join(joined, self.config.mode);
                    summary.record(&report);
                    on_report(&report);
                }
                Err(_) => {
                    run_cancel.cancel();
                    warn!("Hard-stop deadline elapsed, abandoning in-flight run");
                    let report = CycleReport::failed(
                        self.config.mode,
                        ErrorKind::Abandoned,
                        format!(
                            "run still in flight after the {:?} hard-stop deadline",
                            self.config.hard_stop
                        ),
                    );
                    summary.abandoned = true;
                    summary.record(&report);
                    on_report(&report);
                }
            }
        }

        summary
    }

    fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.retry_initial_interval,
            max_interval: self.config.retry_max_interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

async fn join_in_flight(
    handle: &mut Option<JoinHandle<CycleReport>>,
) -> Result<CycleReport, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn unwrap_join(joined: Result<CycleReport, JoinError>, mode: RunMode) -> CycleReport {
    joined.unwrap_or_else(|e| {
        warn!("Pipeline task failed: {}", e);
        CycleReport::failed(mode, ErrorKind::Backend, format!("pipeline task failed: {e}"))
    })
}
