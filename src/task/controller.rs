//! Task lifecycle controller.
//!
//! Owns the single tracked [`Task`] and drives it through
//! `idle → uploading → processing → complete | error`:
//! - `submit()` uploads the selected files and starts the processing timers
//! - a poll timer reconciles the remote status every `poll_interval`
//! - an estimator timer creeps the displayed progress towards 95 %
//! - an elapsed ticker recomputes elapsed seconds while the task is active
//!
//! Every terminal transition and every new file selection cancels all three
//! timers. Network calls run with the state lock released; their results are
//! applied only if the task they were issued for is still the current one.

use std::future::Future;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{self, TaskError};
use crate::scheduler::{Scheduler, Tick, TimerHandle, TokioScheduler};
use crate::service::{
    HttpJobService, InputFile, JobOutcome, JobService, OutputFormat, SecurityLevel,
};
use crate::task::log::{LogChannel, LogEntry};
use crate::task::progress::ProgressEstimator;
use crate::task::state::{Task, TaskSnapshot, TaskState};

/// Progress shown once the upload starts.
const UPLOAD_PROGRESS_FLOOR: f64 = 10.0;
/// Progress shown once the service accepted the job.
const PROCESSING_PROGRESS_FLOOR: f64 = 20.0;

const WORKER_CRASH_MESSAGE: &str = "ERR: System Worker Crash.";

/// Result of one status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    /// The poll belonged to a superseded or finished task; nothing applied.
    Stale,
    /// The status query failed. Swallowed: the next tick simply retries.
    Transient,
    /// The job is still running.
    Running,
    /// The job finished and the task moved to this terminal state.
    Terminal(TaskState),
}

/// Handles of the timers scoped to the current task.
#[derive(Debug, Default)]
struct TaskTimers {
    elapsed: Option<TimerHandle>,
    poll: Option<TimerHandle>,
    estimate: Option<TimerHandle>,
}

impl TaskTimers {
    fn cancel_all(&mut self, scheduler: &dyn Scheduler) {
        for handle in [self.elapsed.take(), self.poll.take(), self.estimate.take()]
            .into_iter()
            .flatten()
        {
            scheduler.cancel(handle);
        }
    }

    fn count(&self) -> usize {
        [self.elapsed, self.poll, self.estimate]
            .iter()
            .filter(|h| h.is_some())
            .count()
    }
}

/// Running estimate for the processing phase.
#[derive(Debug, Clone, Copy)]
struct EstimatorRun {
    estimator: ProgressEstimator,
    base: f64,
    ticks: u64,
}

struct Inner {
    task: Task,
    timers: TaskTimers,
    estimate: Option<EstimatorRun>,
    closed: bool,
}

impl Inner {
    /// Job id of the task identified by `key`, if it is still being processed.
    fn processing_job(&self, key: Uuid) -> Option<String> {
        (self.task.key == key && self.task.state == TaskState::Processing)
            .then(|| self.task.id.clone())
            .flatten()
    }
}

/// Drives the lifecycle of the tracked task.
pub struct TaskController {
    config: ClientConfig,
    service: Arc<dyn JobService>,
    scheduler: Arc<dyn Scheduler>,
    log: LogChannel,
    inner: Mutex<Inner>,
    this: Weak<TaskController>,
}

impl TaskController {
    /// Create a controller. Timer callbacks only hold a weak reference, so
    /// dropping the last `Arc` stops observation.
    pub fn new(
        config: ClientConfig,
        service: Arc<dyn JobService>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let log = LogChannel::new();
        log.append(format!(
            "System Ready. Waiting for input... (v{})",
            env!("CARGO_PKG_VERSION")
        ));

        Arc::new_cyclic(|this| Self {
            config,
            service,
            scheduler,
            log,
            inner: Mutex::new(Inner {
                task: Task::new(Vec::new()),
                timers: TaskTimers::default(),
                estimate: None,
                closed: false,
            }),
            this: this.clone(),
        })
    }

    /// Controller talking HTTP to `config.base_url` on tokio timers.
    pub fn from_config(config: ClientConfig) -> Arc<Self> {
        let service: Arc<dyn JobService> = Arc::new(HttpJobService::new(&config));
        let scheduler: Arc<dyn Scheduler> = TokioScheduler::new();
        Self::new(config, service, scheduler)
    }

    // ── Operator actions ────────────────────────────────────────────

    /// Replace the tracked task with a fresh one holding `files`.
    ///
    /// Refused while a task is uploading or processing; an empty selection is
    /// ignored.
    pub async fn select_files(&self, files: Vec<InputFile>) -> Result<(), TaskError> {
        if files.is_empty() {
            return Err(TaskError::NoFiles);
        }

        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(TaskError::Closed);
        }
        if inner.task.state.is_active() {
            tracing::warn!(
                task_key = %inner.task.key,
                state = %inner.task.state,
                "File selection refused while task is active"
            );
            return Err(TaskError::Busy {
                state: inner.task.state,
            });
        }

        inner.timers.cancel_all(self.scheduler.as_ref());
        inner.estimate = None;

        let count = files.len();
        inner.task = Task::new(files);
        tracing::info!(task_key = %inner.task.key, files = count, "Files selected");
        self.log.append(format!(
            "Targets acquired: {count} file(s). Select parameters."
        ));
        Ok(())
    }

    /// Upload the selected files and start tracking the job.
    ///
    /// Only valid from `idle` with files selected; otherwise nothing is sent.
    /// A failed upload moves the task to `error` (already logged) and is
    /// returned for the caller's information only.
    pub async fn submit(
        &self,
        level: SecurityLevel,
        format: OutputFormat,
    ) -> Result<String, TaskError> {
        let (key, files) = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Err(TaskError::Closed);
            }
            if inner.task.inputs.is_empty() {
                tracing::warn!("Submit refused: no files selected");
                return Err(TaskError::NoFiles);
            }
            if inner.task.state != TaskState::Idle {
                tracing::warn!(state = %inner.task.state, "Submit refused");
                return Err(TaskError::Busy {
                    state: inner.task.state,
                });
            }

            let task = &mut inner.task;
            task.transition_to(TaskState::Uploading)?;
            task.security_level = level;
            task.output_format = format;
            task.started_at = Some(Instant::now());
            task.elapsed_seconds = 0;
            task.raise_progress(UPLOAD_PROGRESS_FLOOR);
            let key = task.key;
            let files = Arc::clone(&task.inputs);

            inner.timers.cancel_all(self.scheduler.as_ref());
            let tick = self.tick(key, |this, key| async move { this.elapsed_tick(key).await });
            inner.timers.elapsed = Some(
                self.scheduler
                    .schedule_repeating(self.config.elapsed_interval, tick),
            );

            tracing::info!(task_key = %key, files = files.len(), %level, %format, "Upload started");
            self.log.append("Initiating secure upload...");
            (key, files)
        };

        let response = self.service.submit(&files, level, format).await;

        let mut inner = self.inner.lock().await;
        if inner.closed || inner.task.key != key || inner.task.state != TaskState::Uploading {
            tracing::debug!(task_key = %key, "Discarding submission response for superseded task");
            return Err(TaskError::Superseded);
        }

        match response {
            Ok(job_id) => {
                self.begin_processing(&mut inner, job_id.clone())?;
                Ok(job_id)
            }
            Err(e) => {
                tracing::error!(task_key = %key, error = %e, "Submission failed");
                let task = &mut inner.task;
                task.transition_to(TaskState::Error)?;
                task.reset_progress();
                task.freeze_elapsed(None, Instant::now());
                self.log.append("CRITICAL: Upload Negotiation Failed.");
                inner.timers.cancel_all(self.scheduler.as_ref());
                Err(TaskError::SubmissionFailed(e))
            }
        }
    }

    /// Fetch the artifact of a completed task.
    pub async fn download(&self) -> error::Result<Vec<u8>> {
        let job_id = self.completed_job().await?;
        Ok(self.service.download(&job_id).await?)
    }

    /// URL a browser would open to download the artifact.
    pub async fn download_url(&self) -> Result<String, TaskError> {
        let job_id = self.completed_job().await?;
        Ok(self.service.download_url(&job_id))
    }

    /// Stop observing: cancel every timer and refuse further actions.
    ///
    /// Nothing is sent to the service; a submitted job keeps running remotely.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.estimate = None;
        inner.timers.cancel_all(self.scheduler.as_ref());
        tracing::info!(task_key = %inner.task.key, state = %inner.task.state, "Controller shut down");
    }

    // ── Read model ──────────────────────────────────────────────────

    pub async fn snapshot(&self) -> TaskSnapshot {
        self.inner.lock().await.task.snapshot()
    }

    pub async fn state(&self) -> TaskState {
        self.inner.lock().await.task.state
    }

    /// Number of timers the controller holds for the current task.
    pub async fn active_timers(&self) -> usize {
        self.inner.lock().await.timers.count()
    }

    pub fn log(&self) -> &LogChannel {
        &self.log
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.log.subscribe()
    }

    // ── Transitions ─────────────────────────────────────────────────

    fn begin_processing(&self, inner: &mut Inner, job_id: String) -> Result<(), TaskError> {
        let task = &mut inner.task;
        task.assign_id(job_id.clone());
        task.transition_to(TaskState::Processing)?;
        task.raise_progress(PROCESSING_PROGRESS_FLOOR);

        let key = task.key;
        let level = task.security_level;
        let format = task.output_format;
        let file_count = task.inputs.len();

        self.log.append(format!(
            "Upload complete. Task ID: {}...",
            job_id.chars().take(8).collect::<String>()
        ));
        self.log.append(format!(
            "Engaging cloaking sequence (Level: {}, Format: {})...",
            level.as_str().to_uppercase(),
            format.as_str().to_uppercase()
        ));

        for stale in [inner.timers.poll.take(), inner.timers.estimate.take()]
            .into_iter()
            .flatten()
        {
            self.scheduler.cancel(stale);
        }

        let poll = self.tick(key, |this, key| async move {
            let outcome = this.poll_once(key).await;
            tracing::trace!(task_key = %key, ?outcome, "Poll tick");
        });
        inner.timers.poll = Some(
            self.scheduler
                .schedule_repeating(self.config.poll_interval, poll),
        );

        // File count is never zero here, submit() refuses empty selections.
        inner.estimate = ProgressEstimator::new(level, file_count).map(|estimator| EstimatorRun {
            estimator,
            base: PROCESSING_PROGRESS_FLOOR,
            ticks: 0,
        });
        if inner.estimate.is_some() {
            let estimate = self.tick(key, |this, key| async move { this.estimate_tick(key).await });
            inner.timers.estimate = Some(
                self.scheduler
                    .schedule_repeating(self.config.estimate_interval, estimate),
            );
        }

        tracing::info!(task_key = %key, job_id = %job_id, %level, %format, "Job accepted, polling");
        Ok(())
    }

    /// Confirmed success: progress 100, elapsed frozen, timers gone.
    fn finish_complete(&self, inner: &mut Inner, reported_elapsed: Option<f64>) -> PollOutcome {
        let reported_elapsed = reported_elapsed.filter(|t| t.is_finite() && *t > 0.0);
        let task = &mut inner.task;
        if let Err(e) = task.transition_to(TaskState::Complete) {
            tracing::warn!(error = %e, "Ignoring completion");
            return PollOutcome::Stale;
        }
        task.raise_progress(100.0);
        task.freeze_elapsed(reported_elapsed, Instant::now());

        let total = match reported_elapsed {
            Some(t) => t.to_string(),
            None => task.elapsed_seconds.to_string(),
        };
        tracing::info!(task_key = %task.key, job_id = ?task.id, total_secs = %total, "Job complete");
        self.log
            .append(format!("Cloaking Sequence Complete. Total Time: {total}s"));

        inner.estimate = None;
        inner.timers.cancel_all(self.scheduler.as_ref());
        PollOutcome::Terminal(TaskState::Complete)
    }

    fn finish_error(
        &self,
        inner: &mut Inner,
        message: String,
        reported_elapsed: Option<f64>,
    ) -> PollOutcome {
        let reported_elapsed = reported_elapsed.filter(|t| t.is_finite() && *t > 0.0);
        let task = &mut inner.task;
        if let Err(e) = task.transition_to(TaskState::Error) {
            tracing::warn!(error = %e, "Ignoring failure");
            return PollOutcome::Stale;
        }
        task.freeze_elapsed(reported_elapsed, Instant::now());

        tracing::warn!(task_key = %task.key, job_id = ?task.id, %message, "Job failed");
        self.log.append(message);

        inner.estimate = None;
        inner.timers.cancel_all(self.scheduler.as_ref());
        PollOutcome::Terminal(TaskState::Error)
    }

    // ── Timer callbacks ─────────────────────────────────────────────

    /// Wrap a callback for the scheduler. The callback is skipped once the
    /// controller is gone.
    fn tick<F, Fut>(&self, key: Uuid, f: F) -> Tick
    where
        F: Fn(Arc<Self>, Uuid) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let this = self.this.clone();
        Arc::new(move || match this.upgrade() {
            Some(controller) => f(controller, key).boxed(),
            None => futures::future::ready(()).boxed(),
        })
    }

    async fn poll_once(&self, key: Uuid) -> PollOutcome {
        let job_id = match self.inner.lock().await.processing_job(key) {
            Some(id) => id,
            None => return PollOutcome::Stale,
        };

        let response = self.service.status(&job_id).await;

        let mut inner = self.inner.lock().await;
        if inner.closed || inner.processing_job(key).as_deref() != Some(job_id.as_str()) {
            tracing::debug!(task_key = %key, job_id = %job_id, "Discarding status for superseded task");
            return PollOutcome::Stale;
        }

        let status = match response {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Status poll failed, retrying next tick");
                return PollOutcome::Transient;
            }
        };

        match status.outcome() {
            JobOutcome::Running => PollOutcome::Running,
            JobOutcome::Succeeded { elapsed_time } => self.finish_complete(&mut inner, elapsed_time),
            JobOutcome::Failed {
                message,
                elapsed_time,
            } => self.finish_error(&mut inner, format!("ERR: {message}"), elapsed_time),
            JobOutcome::Crashed => {
                self.finish_error(&mut inner, WORKER_CRASH_MESSAGE.to_string(), None)
            }
        }
    }

    async fn estimate_tick(&self, key: Uuid) {
        let mut inner = self.inner.lock().await;
        if inner.closed || inner.task.key != key || inner.task.state != TaskState::Processing {
            return;
        }
        let Some(run) = inner.estimate.as_mut() else {
            return;
        };
        run.ticks += 1;
        let percent = run.estimator.percent_after(run.base, run.ticks);
        inner.task.raise_progress(percent);
    }

    async fn elapsed_tick(&self, key: Uuid) {
        let mut inner = self.inner.lock().await;
        if inner.task.key == key && inner.task.state.is_active() {
            inner.task.tick_elapsed(Instant::now());
        }
    }

    async fn completed_job(&self) -> Result<String, TaskError> {
        let inner = self.inner.lock().await;
        match (&inner.task.state, &inner.task.id) {
            (TaskState::Complete, Some(id)) => Ok(id.clone()),
            _ => Err(TaskError::NotComplete),
        }
    }
}
