//! Task status polling.
//!
//! [`JobStatusPoller::watch`] spawns a single cooperative loop per job:
//! wait, request status, deliver the snapshot, and reschedule unless the
//! job reached a terminal state. There is at most one outstanding status
//! request per watched job, so updates are delivered in arrival order.
//!
//! Cancellation stops further scheduling but does not abort a request
//! already in flight; its response is dropped instead of delivered.
//! Dropping the [`WatchHandle`] cancels the watch.

use std::sync::Arc;
use std::time::Duration;

use madsea_core::job::{JobHandle, JobStatusSnapshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::GenerationBackend;
use crate::error::PollError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Failure tolerance for the watch loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Consecutive failed status checks after which the job is abandoned.
    pub max_consecutive_failures: u32,
    /// Factor by which the delay grows after each failed check.
    pub backoff_multiplier: f64,
    /// Upper bound on the delay between checks while failing.
    pub max_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`PollConfig::max_backoff`].
pub fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.backoff_multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_backoff)
}

// ---------------------------------------------------------------------------
// Watch outcome and handle
// ---------------------------------------------------------------------------

/// How a watch ended. Delivered to `on_terminal` exactly once, and never
/// after cancellation.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// The backend reported a terminal state.
    Terminal(JobStatusSnapshot),
    /// Status checks kept failing; the job's fate is unknown.
    Abandoned(PollError),
}

/// Handle to a running watch loop. The loop is cancelled when the handle
/// is dropped.
pub struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop scheduling further polls.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this watch when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit.
    pub async fn join(mut self) {
        if let Err(e) = (&mut self.task).await {
            tracing::error!(error = %e, "Watch task panicked");
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct JobStatusPoller {
    backend: Arc<dyn GenerationBackend>,
    config: PollConfig,
}

impl JobStatusPoller {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: PollConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Single status check.
    pub async fn poll(&self, job: &JobHandle) -> Result<JobStatusSnapshot, PollError> {
        self.backend.fetch_status(job).await
    }

    /// Poll `job` every `interval` until it reaches a terminal state.
    ///
    /// `on_update` receives every snapshot, terminal ones included;
    /// `on_terminal` then receives the final outcome. Transient failures
    /// back off and retry; after [`PollConfig::max_consecutive_failures`]
    /// the watch ends with [`WatchOutcome::Abandoned`].
    pub fn watch<U, T>(
        &self,
        job: JobHandle,
        interval: Duration,
        on_update: U,
        on_terminal: T,
    ) -> WatchHandle
    where
        U: FnMut(&JobStatusSnapshot) + Send + 'static,
        T: FnOnce(WatchOutcome) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_watch(
            Arc::clone(&self.backend),
            self.config.clone(),
            job,
            interval,
            cancel.clone(),
            on_update,
            on_terminal,
        ));
        WatchHandle { cancel, task }
    }
}

/// The watch loop: sleep -> poll -> deliver, until terminal or cancelled.
async fn run_watch<U, T>(
    backend: Arc<dyn GenerationBackend>,
    config: PollConfig,
    job: JobHandle,
    interval: Duration,
    cancel: CancellationToken,
    mut on_update: U,
    on_terminal: T,
) where
    U: FnMut(&JobStatusSnapshot) + Send + 'static,
    T: FnOnce(WatchOutcome) + Send + 'static,
{
    let mut delay = interval;
    let mut failures = 0u32;

    tracing::debug!(
        task_id = %job,
        interval_ms = interval.as_millis() as u64,
        "Watching generation task",
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(task_id = %job, "Watch cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let result = backend.fetch_status(&job).await;

        if cancel.is_cancelled() {
            tracing::debug!(task_id = %job, "Discarding status received after cancellation");
            return;
        }

        match result {
            Ok(snapshot) => {
                failures = 0;
                delay = interval;
                tracing::debug!(
                    task_id = %job,
                    state = %snapshot.state,
                    progress = snapshot.progress_percent,
                    completed_scenes = snapshot.completed_scenes,
                    "Task status",
                );

                on_update(&snapshot);

                if snapshot.state.is_terminal() {
                    tracing::info!(task_id = %job, state = %snapshot.state, "Task finished");
                    on_terminal(WatchOutcome::Terminal(snapshot));
                    return;
                }
            }
            Err(e) => {
                failures += 1;
                if failures >= config.max_consecutive_failures {
                    tracing::error!(
                        task_id = %job,
                        attempts = failures,
                        error = %e,
                        "Abandoning task after repeated status failures",
                    );
                    on_terminal(WatchOutcome::Abandoned(PollError::Exhausted {
                        attempts: failures,
                        last_error: e.to_string(),
                    }));
                    return;
                }

                delay = next_delay(delay, &config).max(interval);
                tracing::warn!(
                    task_id = %job,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Status check failed, will retry",
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
