//! Polling scheduler for jobs.
//!
//! Every tick fires due jobs by inserting a `queued` attempt, then claims and
//! dispatches queued attempts whose `not_before` has passed. Retries are
//! ordinary queued attempts with a later `not_before`, so one dispatch path
//! serves first runs, retries and on-demand runs alike.

pub mod chain;
pub mod trigger;

pub use trigger::{Trigger, parse_cron};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::core::error::{DaemonError, DaemonResult};
use crate::core::executor::{ExecutionEngine, ExecutionOutcome, ExecutionRequest};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::store::{
    CommandStore, EnqueueRequest, JobCommandKind, JobExecutionOutcome, JobExecutionRecord,
    JobExecutionStatus, JobRecord, JobStatus,
};
use crate::core::validation::sanitize_for_log;

#[derive(Clone)]
pub struct Scheduler {
    store: CommandStore,
    engine: Arc<ExecutionEngine>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    tick: Duration,
    /// Jobs currently reported as overrunning, so each episode logs once.
    overrunning: Arc<Mutex<HashSet<String>>>,
}

/// `{job}-{yyyymmddHHMMSS}-{8 hex}`; unique per job.
fn execution_id(job_name: &str, at: DateTime<Utc>) -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", job_name, at.format("%Y%m%d%H%M%S"), &token[..8])
}

impl Scheduler {
    pub fn new(
        store: CommandStore,
        engine: Arc<ExecutionEngine>,
        cancel: CancellationToken,
        tracker: TaskTracker,
        tick: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            cancel,
            tracker,
            tick,
            overrunning: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Attempts left queued or running by a previous process cannot still be
    /// alive; close them out before the first tick.
    pub async fn recover(&self) -> DaemonResult<usize> {
        let killed = self
            .store
            .kill_in_flight("crash_recovery", "daemon restarted while attempt was in flight")
            .await?;
        if killed > 0 {
            warn!(count = killed, "Marked stale job executions as killed");
        }
        Ok(killed)
    }

    /// Tick until cancelled.
    pub async fn run_loop(self) {
        let mut interval = tokio::time::interval(self.tick);
        info!(tick_secs = self.tick.as_secs(), "Scheduler loop started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.tick(Utc::now()).await {
                error!("Scheduler tick failed: {}", e);
            }
        }
        info!("Scheduler loop stopped");
    }

    /// One scheduling pass at `now`. Returns how many attempts were
    /// dispatched.
    pub async fn tick(&self, now: DateTime<Utc>) -> DaemonResult<usize> {
        for job in self.store.due_jobs(now).await? {
            self.fire(&job, now).await?;
        }
        self.dispatch_due(now).await
    }

    async fn fire(&self, job: &JobRecord, now: DateTime<Utc>) -> DaemonResult<()> {
        let queued = self
            .store
            .enqueue_if_idle(EnqueueRequest {
                job_id: &job.id,
                execution_id: execution_id(&job.job_name, now),
                retry_count: 0,
                parent_execution_id: None,
                not_before: now,
            })
            .await?;

        let Some(run) = queued else {
            let first_report = self
                .overrunning
                .lock()
                .map(|mut set| set.insert(job.id.clone()))
                .unwrap_or(false);
            if first_report {
                warn!(
                    job = %job.job_name,
                    "Job overran its schedule; skipping fire while previous attempt is in flight"
                );
            }
            return Ok(());
        };

        if let Ok(mut set) = self.overrunning.lock() {
            set.remove(&job.id);
        }
        let next = Trigger::for_job(job)
            .ok()
            .and_then(|t| t.next_fire(now, Some(now)));
        self.store.schedule_next_run(&job.id, next).await?;
        info!(job = %job.job_name, execution_id = %run.execution_id, "Job fired");
        Ok(())
    }

    /// Claim every queued attempt that is due and run each on the tracker.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> DaemonResult<usize> {
        if self.cancel.is_cancelled() {
            return Ok(0);
        }
        let mut dispatched = 0;
        for run in self.store.queued_due(now).await? {
            if !self.store.claim_job_execution(&run.id, Utc::now()).await? {
                continue;
            }
            let this = self.clone();
            self.tracker.spawn(async move {
                if let Err(e) = this.execute_attempt(run).await {
                    error!("Job attempt failed to complete: {}", e);
                }
            });
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Queue an immediate run of `job` and dispatch it without waiting for
    /// the next tick.
    pub async fn run_now(&self, job: &JobRecord) -> DaemonResult<JobExecutionRecord> {
        if job.status == JobStatus::Archived {
            return Err(DaemonError::Validation(format!(
                "job '{}' is archived",
                job.job_name
            )));
        }
        let now = Utc::now();
        let run = self
            .store
            .enqueue_if_idle(EnqueueRequest {
                job_id: &job.id,
                execution_id: execution_id(&job.job_name, now),
                retry_count: 0,
                parent_execution_id: None,
                not_before: now,
            })
            .await?
            .ok_or_else(|| {
                DaemonError::Validation(format!(
                    "job '{}' already has an execution in flight",
                    job.job_name
                ))
            })?;
        self.dispatch_due(now).await?;
        Ok(run)
    }

    async fn execute_attempt(&self, run: JobExecutionRecord) -> DaemonResult<()> {
        let started_at = run.started_at.unwrap_or_else(Utc::now);
        let job = match self.store.get_job_by_id(&run.job_id).await {
            Ok(job) => job,
            // Deleted while queued; its attempts went with it.
            Err(DaemonError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        // A retry belongs to the schedule; once the job leaves `active` the
        // rest of the chain is dropped.
        if run.retry_count > 0 && job.status != JobStatus::Active {
            let closed = self
                .store
                .finish_job_execution(&run.id, halted(started_at, job.status))
                .await?;
            info!(
                job = %job.job_name,
                execution_id = %closed.execution_id,
                status = %job.status,
                "Skipped retry of inactive job"
            );
            return Ok(());
        }

        let outcome = match self.resolve_request(&job).await {
            Ok(req) => {
                info!(
                    job = %job.job_name,
                    execution_id = %run.execution_id,
                    retry_count = run.retry_count,
                    command = %sanitize_for_log(&req.code),
                    "Dispatching job attempt"
                );
                self.run_request(&job, &run, &req, started_at).await
            }
            Err(e) => failure(started_at, "not_found", e.to_string()),
        };

        let finished = self.store.finish_job_execution(&run.id, outcome).await?;
        info!(
            job = %job.job_name,
            execution_id = %finished.execution_id,
            status = %finished.status,
            duration_ms = ?finished.duration_ms,
            "Job attempt finished"
        );

        // Re-read: the job may have been paused or deleted during the run.
        let job = match self.store.get_job_by_id(&job.id).await {
            Ok(job) => job,
            Err(DaemonError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        if job.status == JobStatus::Active
            && finished.status.is_retryable()
            && !self.cancel.is_cancelled()
        {
            self.schedule_retry(&job, &finished).await?;
        }

        let next = if job.status == JobStatus::Active {
            Trigger::for_job(&job)
                .ok()
                .and_then(|t| t.next_fire(Utc::now(), Some(started_at)))
        } else {
            job.next_run
        };
        self.store.record_job_run(&job.id, started_at, next).await
    }

    async fn resolve_request(&self, job: &JobRecord) -> DaemonResult<ExecutionRequest> {
        let (name, code, language) = match job.command_kind {
            JobCommandKind::Inline => (job.job_name.clone(), job.command.clone(), job.language),
            JobCommandKind::Stored => {
                let cmd = self
                    .store
                    .get_command(&job.command, job.command_group.as_deref())
                    .await?;
                if !cmd.is_active {
                    return Err(DaemonError::not_found("command", &job.command));
                }
                (cmd.name, cmd.code, cmd.language)
            }
        };
        Ok(ExecutionRequest {
            name,
            code,
            language,
            args: Vec::new(),
            env: job.environment.clone(),
            working_directory: job.working_directory.as_ref().map(Into::into),
            timeout: Duration::from_secs(job.timeout_seconds.max(1) as u64),
        })
    }

    async fn run_request(
        &self,
        job: &JobRecord,
        run: &JobExecutionRecord,
        req: &ExecutionRequest,
        started_at: DateTime<Utc>,
    ) -> JobExecutionOutcome {
        let (pid_tx, pid_rx) = oneshot::channel();
        let store = self.store.clone();
        let run_id = run.id.clone();
        tokio::spawn(async move {
            if let Ok(pid) = pid_rx.await
                && let Err(e) = store.set_job_execution_pid(&run_id, pid).await
            {
                warn!("Could not record pid for {}: {}", run_id, e);
            }
        });

        match self.engine.run(req, &self.cancel, Some(pid_tx)).await {
            Ok(outcome) => job_outcome(job, started_at, outcome, self.cancel.is_cancelled()),
            Err(e) => failure(started_at, "infrastructure", e.to_string()),
        }
    }

    async fn schedule_retry(&self, job: &JobRecord, failed: &JobExecutionRecord) -> DaemonResult<()> {
        let arena = self.store.job_execution_arena(&job.id).await?;
        let retry_count = chain::next_retry_count(&arena, &failed.id);
        if retry_count > job.max_retries {
            info!(
                job = %job.job_name,
                attempts = retry_count,
                "Retries exhausted"
            );
            return Ok(());
        }

        let now = Utc::now();
        let not_before = now + chrono::Duration::seconds(job.retry_delay_seconds);
        let queued = self
            .store
            .enqueue_if_idle(EnqueueRequest {
                job_id: &job.id,
                execution_id: execution_id(&job.job_name, now),
                retry_count,
                parent_execution_id: Some(&failed.id),
                not_before,
            })
            .await?;
        match queued {
            Some(retry) => info!(
                job = %job.job_name,
                execution_id = %retry.execution_id,
                retry_count,
                not_before = %not_before,
                "Retry scheduled"
            ),
            None => warn!(
                job = %job.job_name,
                failed_execution_id = %failed.execution_id,
                retry_count,
                "Retry dropped; another attempt of this job is already in flight"
            ),
        }
        Ok(())
    }
}

fn failure(started_at: DateTime<Utc>, error_type: &str, message: String) -> JobExecutionOutcome {
    JobExecutionOutcome {
        status: JobExecutionStatus::Failed,
        exit_code: None,
        pid: None,
        started_at,
        completed_at: Utc::now(),
        stdout: String::new(),
        stderr: String::new(),
        max_memory_mb: None,
        avg_cpu_percent: None,
        error_type: Some(error_type.to_string()),
        error_message: Some(message),
    }
}

/// Terminal record for a queued attempt whose job is no longer active.
fn halted(started_at: DateTime<Utc>, status: JobStatus) -> JobExecutionOutcome {
    JobExecutionOutcome {
        status: JobExecutionStatus::Killed,
        error_type: Some(format!("job_{}", status.as_str())),
        error_message: Some(format!("job is {}; attempt not started", status)),
        ..failure(started_at, "", String::new())
    }
}

/// Translate an engine outcome, noting any resource ceiling the attempt
/// went over. Ceilings are recorded, not enforced.
fn job_outcome(
    job: &JobRecord,
    started_at: DateTime<Utc>,
    outcome: ExecutionOutcome,
    shutting_down: bool,
) -> JobExecutionOutcome {
    let status = JobExecutionStatus::from(outcome.status);
    let mut notes = Vec::new();
    if let (Some(limit), Some(peak)) = (job.max_memory_mb, outcome.max_memory_mb)
        && peak > limit as f64
    {
        notes.push(format!("peak memory {:.1} MiB exceeded limit {} MiB", peak, limit));
    }
    if let (Some(limit), Some(avg)) = (job.max_cpu_percent, outcome.avg_cpu_percent)
        && avg > limit
    {
        notes.push(format!("average cpu {:.1}% exceeded limit {:.1}%", avg, limit));
    }
    if !notes.is_empty() {
        warn!(job = %job.job_name, "{}", notes.join("; "));
    }

    let error_type = match status {
        JobExecutionStatus::Failed => Some("exit_code"),
        JobExecutionStatus::Timeout => Some("timeout"),
        JobExecutionStatus::Killed if shutting_down => Some("shutdown"),
        JobExecutionStatus::Killed => Some("killed"),
        _ => None,
    };
    if status == JobExecutionStatus::Timeout {
        notes.insert(0, format!("exceeded timeout of {}s", job.timeout_seconds));
    }

    JobExecutionOutcome {
        status,
        exit_code: outcome.exit_code,
        pid: outcome.pid,
        started_at,
        completed_at: Utc::now(),
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        max_memory_mb: outcome.max_memory_mb,
        avg_cpu_percent: outcome.avg_cpu_percent,
        error_type: error_type.map(str::to_string),
        error_message: (!notes.is_empty()).then(|| notes.join("; ")),
    }
}

/// Hosts the tick loop under the lifecycle manager.
pub struct SchedulerComponent {
    scheduler: Scheduler,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SchedulerComponent {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            handle: None,
        }
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for SchedulerComponent {
    async fn on_init(&mut self) -> anyhow::Result<()> {
        info!("Scheduler initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> anyhow::Result<()> {
        self.handle = Some(tokio::spawn(self.scheduler.clone().run_loop()));
        Ok(())
    }

    /// The loop exits once the shared cancellation token fires.
    async fn on_shutdown(&mut self) -> anyhow::Result<()> {
        self.scheduler.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        info!("Scheduler shut down");
        Ok(())
    }
}
