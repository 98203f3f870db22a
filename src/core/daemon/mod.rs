//! The long-lived service value that owns the store, the similarity index,
//! the execution engine and the scheduler, and exposes every client
//! operation. Handlers receive it as `Arc<DaemonService>`.

pub mod types;

pub use types::*;

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::core::config::DaemonConfig;
use crate::core::error::{DaemonError, DaemonResult};
use crate::core::executor::{ExecutionEngine, ExecutionRequest, Language};
use crate::core::scheduler::{Scheduler, Trigger, chain};
use crate::core::search::{ScoredCommand, SimilarityIndex};
use crate::core::store::{
    CommandFilter, CommandPatch, CommandRecord, CommandStore, ExecutionRecord, ExecutionStatus,
    GroupNode, GroupRecord, GroupRemoval, JobCommandKind, JobExecutionRecord, JobRecord,
    JobStatus, JobType, NewCommand, NewExecution, NewJob,
};
use crate::core::validation::{self, JobLimits};

pub const DEFAULT_JOB_TIMEOUT_SECS: i64 = 3_600;
pub const DEFAULT_RETRY_DELAY_SECS: i64 = 60;
const MAX_TOP_K: usize = 100;

pub struct DaemonService {
    config: DaemonConfig,
    data_dir: PathBuf,
    store: CommandStore,
    index: RwLock<SimilarityIndex>,
    engine: Arc<ExecutionEngine>,
    slots: Arc<Semaphore>,
    scheduler: Scheduler,
    cancel: CancellationToken,
    tracker: TaskTracker,
    active: Arc<AtomicUsize>,
    started_at: chrono::DateTime<Utc>,
}

/// Decrements the active-execution gauge on every exit path.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn check_timeout(secs: u64) -> DaemonResult<Duration> {
    if secs == 0 || secs > validation::MAX_TIMEOUT_SECS as u64 {
        return Err(DaemonError::Validation(format!(
            "timeout_seconds must be between 1 and {}",
            validation::MAX_TIMEOUT_SECS
        )));
    }
    Ok(Duration::from_secs(secs))
}

/// Run one interactive execution and append it to the command's history.
/// Infrastructure faults are recorded as `error` before being returned.
async fn run_and_record(
    engine: &ExecutionEngine,
    store: &CommandStore,
    command_id: &str,
    request: &ExecutionRequest,
    cancel: &CancellationToken,
) -> DaemonResult<ExecutionReport> {
    let started = std::time::Instant::now();
    let (new, fault) = match engine.run(request, cancel, None).await {
        Ok(outcome) => (
            NewExecution {
                status: outcome.status,
                output: outcome.stdout,
                error: outcome.stderr,
                exit_code: outcome.exit_code,
                duration_ms: outcome.duration_ms,
            },
            None,
        ),
        Err(e) => {
            warn!(command_id, "Execution infrastructure fault: {}", e);
            (
                NewExecution {
                    status: ExecutionStatus::Error,
                    output: String::new(),
                    error: e.to_string(),
                    exit_code: None,
                    duration_ms: started.elapsed().as_millis() as i64,
                },
                Some(e),
            )
        }
    };
    let record = store.record_execution(command_id, new).await?;
    match fault {
        Some(e) => Err(e),
        None => Ok(ExecutionReport::from(record)),
    }
}

fn clamp_top_k(top_k: usize) -> usize {
    top_k.clamp(1, MAX_TOP_K)
}

impl DaemonService {
    /// Open the store under `data_dir` and get everything ready to serve.
    pub async fn open(config: DaemonConfig, data_dir: &Path) -> DaemonResult<Self> {
        let store = CommandStore::open(data_dir).await?;
        Self::with_store(config, data_dir.to_path_buf(), store).await
    }

    pub async fn with_store(
        config: DaemonConfig,
        data_dir: PathBuf,
        store: CommandStore,
    ) -> DaemonResult<Self> {
        let engine = Arc::new(ExecutionEngine::new(
            config.interpreter_overrides(),
            config.daemon.output_limit_bytes,
        ));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let scheduler = Scheduler::new(
            store.clone(),
            engine.clone(),
            cancel.clone(),
            tracker.clone(),
            Duration::from_secs(config.daemon.scheduler_tick_secs),
        );
        scheduler.recover().await?;

        let service = Self {
            slots: Arc::new(Semaphore::new(config.daemon.max_concurrent_commands)),
            config,
            data_dir,
            store,
            index: RwLock::new(SimilarityIndex::default()),
            engine,
            scheduler,
            cancel,
            tracker,
            active: Arc::new(AtomicUsize::new(0)),
            started_at: Utc::now(),
        };
        service.reindex().await?;
        Ok(service)
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Fires when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn reindex(&self) -> DaemonResult<()> {
        let commands = self.store.list_commands(&CommandFilter::default()).await?;
        let rebuilt = SimilarityIndex::build(&commands);
        let size = rebuilt.len();
        *self.index.write().await = rebuilt;
        info!(documents = size, "Similarity index rebuilt");
        Ok(())
    }

    /// An active command by id or name.
    async fn active_command(&self, key: &str, group: Option<&str>) -> DaemonResult<CommandRecord> {
        let cmd = self.store.get_command(key, group).await?;
        if !cmd.is_active {
            return Err(DaemonError::not_found("command", key));
        }
        Ok(cmd)
    }

    // ---- commands ----

    pub async fn add_command(&self, req: AddCommand) -> DaemonResult<(CommandRecord, Vec<String>)> {
        let mut warnings = Vec::new();
        let name = validation::validate_name("command", &req.name, &mut warnings)?;
        let language =
            Language::resolve(req.language.as_deref(), &req.code).map_err(DaemonError::Validation)?;
        validation::validate_code(&req.code, language, &mut warnings)?;
        let group = match req.group.as_deref().map(str::trim) {
            Some(g) if !g.is_empty() => Some(validation::validate_name("group", g, &mut warnings)?),
            _ => None,
        };
        let tags = validation::normalize_tags(&req.tags)?;

        let created = self
            .store
            .create_command(NewCommand {
                name,
                code: req.code,
                language,
                group,
                tags,
                description: req.description.trim().to_string(),
            })
            .await?;
        info!(command_id = %created.id, name = %created.name, language = %created.language, "Command added");
        self.reindex().await?;
        Ok((created, warnings))
    }

    pub async fn edit_command(
        &self,
        key: &str,
        group: Option<&str>,
        req: EditCommand,
    ) -> DaemonResult<(CommandRecord, Vec<String>)> {
        let current = self.active_command(key, group).await?;
        let mut warnings = Vec::new();

        let name = match &req.name {
            Some(n) => Some(validation::validate_name("command", n, &mut warnings)?),
            None => None,
        };
        let code = req.code.clone();
        let effective_code = code.as_deref().unwrap_or(&current.code);
        let language = match req.language.as_deref() {
            Some(l) => Some(Language::resolve(Some(l), effective_code).map_err(DaemonError::Validation)?),
            None => None,
        };
        if let Some(code) = &code {
            validation::validate_code(code, language.unwrap_or(current.language), &mut warnings)?;
        }
        let new_group = match req.group.as_deref().map(str::trim) {
            Some("") => Some(None),
            Some(g) => Some(Some(validation::validate_name("group", g, &mut warnings)?)),
            None => None,
        };
        let tags = match &req.tags {
            Some(t) => Some(validation::normalize_tags(t)?),
            None => None,
        };

        let patch = CommandPatch {
            name,
            description: req.description.map(|d| d.trim().to_string()),
            code,
            language,
            group: new_group,
            tags,
        };
        if patch.is_empty() {
            return Err(DaemonError::Validation("nothing to change".into()));
        }

        let updated = self.store.edit_command(&current.id, patch).await?;
        info!(command_id = %updated.id, "Command edited");
        self.reindex().await?;
        Ok((updated, warnings))
    }

    pub async fn delete_command(&self, key: &str, group: Option<&str>, hard: bool) -> DaemonResult<String> {
        let cmd = if hard {
            self.store.get_command(key, group).await?
        } else {
            self.active_command(key, group).await?
        };
        self.store.delete_command(&cmd.id, hard).await?;
        info!(command_id = %cmd.id, hard, "Command deleted");
        self.reindex().await?;
        Ok(cmd.id)
    }

    /// Run a stored command and record the result. The run happens on the
    /// daemon's task tracker so shutdown can wait for it, and it is recorded
    /// even if the client goes away.
    pub async fn execute(
        &self,
        key: &str,
        group: Option<&str>,
        req: ExecuteCommand,
    ) -> DaemonResult<ExecutionReport> {
        let cmd = self.active_command(key, group).await?;
        validation::validate_env(&req.env)?;
        let timeout = check_timeout(
            req.timeout_seconds
                .unwrap_or(self.config.daemon.command_timeout_secs),
        )?;
        if self.cancel.is_cancelled() {
            return Err(DaemonError::Infrastructure("daemon is shutting down".into()));
        }

        let request = ExecutionRequest {
            name: cmd.name.clone(),
            code: cmd.code.clone(),
            language: cmd.language,
            args: req.args,
            env: req.env,
            working_directory: None,
            timeout,
        };
        let slots = self.slots.clone();
        let engine = self.engine.clone();
        let store = self.store.clone();
        let cancel = self.cancel.clone();
        let active = self.active.clone();
        let command_id = cmd.id.clone();

        let handle = self.tracker.spawn(async move {
            let _permit = slots
                .acquire_owned()
                .await
                .map_err(|_| DaemonError::Infrastructure("execution slots closed".into()))?;
            let _active = ActiveGuard::enter(&active);
            run_and_record(&engine, &store, &command_id, &request, &cancel).await
        });

        handle
            .await
            .map_err(|e| DaemonError::Infrastructure(format!("execution task failed: {}", e)))?
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        mode: SearchMode,
    ) -> DaemonResult<Vec<ScoredCommand>> {
        let top_k = clamp_top_k(top_k);
        let hits = {
            let index = self.index.read().await;
            match mode {
                SearchMode::Text => index.text_search(query, top_k),
                SearchMode::Similar => index.search(query, top_k),
            }
        };
        self.refresh_hits(hits).await
    }

    pub async fn similar(
        &self,
        key: &str,
        group: Option<&str>,
        top_k: usize,
    ) -> DaemonResult<Vec<ScoredCommand>> {
        let cmd = self.active_command(key, group).await?;
        let hits = self
            .index
            .read()
            .await
            .similar_to(&cmd.id, clamp_top_k(top_k))
            .unwrap_or_default();
        self.refresh_hits(hits).await
    }

    /// The index ranks; the store supplies the current record. Hits whose
    /// command has since been deleted or deactivated are dropped.
    async fn refresh_hits(&self, hits: Vec<ScoredCommand>) -> DaemonResult<Vec<ScoredCommand>> {
        let mut fresh = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get_command(&hit.command.id, None).await {
                Ok(command) if command.is_active => fresh.push(ScoredCommand {
                    command,
                    score: hit.score,
                }),
                Ok(_) | Err(DaemonError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(fresh)
    }

    pub async fn list(&self, filter: CommandFilter) -> DaemonResult<Vec<CommandRecord>> {
        if let Some(group) = &filter.group
            && !self.store.group_exists(group).await?
        {
            return Err(DaemonError::not_found("group", group));
        }
        self.store.list_commands(&filter).await
    }

    pub async fn show(&self, key: &str, group: Option<&str>) -> DaemonResult<CommandDetail> {
        let command = self.store.get_command(key, group).await?;
        let executions = self
            .store
            .list_executions(&command.id, self.config.daemon.history_limit)
            .await?;
        Ok(CommandDetail {
            command,
            executions,
        })
    }

    pub async fn executions(
        &self,
        key: &str,
        group: Option<&str>,
        limit: usize,
    ) -> DaemonResult<Vec<ExecutionRecord>> {
        let command = self.store.get_command(key, group).await?;
        self.store.list_executions(&command.id, limit.max(1)).await
    }

    // ---- groups ----

    pub async fn groups(&self) -> DaemonResult<Vec<GroupNode>> {
        self.store.group_tree().await
    }

    pub async fn create_group(&self, req: CreateGroup) -> DaemonResult<(GroupRecord, Vec<String>)> {
        let mut warnings = Vec::new();
        let name = validation::validate_name("group", &req.name, &mut warnings)?;
        let parent = req.parent.as_deref().map(str::trim).filter(|p| !p.is_empty());
        let group = self
            .store
            .create_group(&name, req.description.trim(), parent)
            .await?;
        Ok((group, warnings))
    }

    pub async fn move_group(&self, name: &str, parent: Option<&str>) -> DaemonResult<GroupRecord> {
        let parent = parent.map(str::trim).filter(|p| !p.is_empty());
        self.store.move_group(name, parent).await
    }

    pub async fn delete_group(&self, name: &str, cascade: bool) -> DaemonResult<GroupRemoval> {
        let removed = self.store.delete_group(name, cascade).await?;
        if removed.commands_deactivated > 0 {
            self.reindex().await?;
        }
        info!(group = name, cascade, "Group deleted");
        Ok(removed)
    }

    // ---- jobs ----

    pub async fn create_job(&self, req: CreateJob) -> DaemonResult<(JobRecord, Vec<String>)> {
        let mut warnings = Vec::new();
        let job_name = validation::validate_name("job", &req.job_name, &mut warnings)?;
        let command_kind = req.command_kind.unwrap_or(JobCommandKind::Inline);

        let (command, language, command_group) = match command_kind {
            JobCommandKind::Inline => {
                let language = Language::resolve(req.language.as_deref(), &req.command)
                    .map_err(DaemonError::Validation)?;
                validation::validate_code(&req.command, language, &mut warnings)?;
                (req.command.clone(), language, None)
            }
            JobCommandKind::Stored => {
                let reference = validation::validate_name("command", &req.command, &mut warnings)?;
                let group = req.command_group.as_deref().map(str::trim).filter(|g| !g.is_empty());
                let language = match self.store.get_command(&reference, group).await {
                    Ok(cmd) => cmd.language,
                    Err(DaemonError::NotFound { .. }) => {
                        warnings.push(format!(
                            "command '{}' does not exist yet; runs will fail until it does",
                            reference
                        ));
                        Language::Bash
                    }
                    Err(e) => return Err(e),
                };
                (reference, language, group.map(str::to_string))
            }
        };

        let limits = JobLimits {
            timeout_seconds: req.timeout_seconds.unwrap_or(DEFAULT_JOB_TIMEOUT_SECS),
            max_retries: req.max_retries.unwrap_or(0),
            retry_delay_seconds: req.retry_delay_seconds.unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            interval_seconds: req.interval_seconds,
            max_memory_mb: req.max_memory_mb,
            max_cpu_percent: req.max_cpu_percent,
        };
        validation::validate_job_limits(&limits)?;
        let cron_expression = req
            .cron_expression
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if let Some(expr) = &cron_expression {
            validation::validate_cron(expr)?;
        }
        let trigger = Trigger::from_parts(cron_expression.as_deref(), req.interval_seconds)
            .map_err(DaemonError::Validation)?;
        validation::validate_env(&req.environment)?;
        if let Some(dir) = &req.working_directory {
            validation::validate_working_directory(dir, &mut warnings)?;
        }

        let job = self
            .store
            .create_job(NewJob {
                job_name,
                description: req.description.trim().to_string(),
                command,
                command_kind,
                command_group,
                language,
                job_type: req.job_type.unwrap_or(JobType::Shell),
                cron_expression,
                interval_seconds: req.interval_seconds,
                next_run: trigger.next_fire(Utc::now(), None),
                environment: req.environment,
                working_directory: req.working_directory,
                max_memory_mb: limits.max_memory_mb,
                max_cpu_percent: limits.max_cpu_percent,
                timeout_seconds: limits.timeout_seconds,
                max_retries: limits.max_retries,
                retry_delay_seconds: limits.retry_delay_seconds,
                tags: validation::normalize_tags(&req.tags)?,
                priority: req.priority,
            })
            .await?;
        info!(job = %job.job_name, next_run = ?job.next_run, "Job created");
        Ok((job, warnings))
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> DaemonResult<Vec<JobRecord>> {
        self.store.list_jobs(status).await
    }

    pub async fn job_status(&self, name: &str) -> DaemonResult<JobStatusReport> {
        let job = self.store.get_job(name).await?;
        let latest_execution = self.store.latest_job_execution(&job.id).await?;
        let retry_chain = match &latest_execution {
            Some(latest) => {
                let arena = self.store.job_execution_arena(&job.id).await?;
                chain::retry_chain(&arena, &latest.id)
                    .into_iter()
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };
        Ok(JobStatusReport {
            job,
            latest_execution,
            retry_chain,
        })
    }

    pub async fn job_executions(&self, name: &str, limit: usize) -> DaemonResult<Vec<JobExecutionRecord>> {
        let job = self.store.get_job(name).await?;
        self.store.list_job_executions(&job.id, limit.max(1)).await
    }

    pub async fn delete_job(&self, name: &str) -> DaemonResult<()> {
        let job = self.store.get_job(name).await?;
        if self.store.has_in_flight(&job.id).await? {
            return Err(DaemonError::Validation(format!(
                "job '{}' has an execution in flight",
                name
            )));
        }
        self.store.delete_job(&job.id).await?;
        info!(job = name, "Job deleted");
        Ok(())
    }

    /// Apply a status transition. Only active jobs carry a `next_run`;
    /// resuming recomputes it from now.
    pub async fn set_job_status(&self, name: &str, target: JobStatus) -> DaemonResult<JobRecord> {
        let job = self.store.get_job(name).await?;
        let allowed = match target {
            JobStatus::Paused => job.status == JobStatus::Active,
            JobStatus::Active => matches!(job.status, JobStatus::Paused | JobStatus::Disabled),
            JobStatus::Disabled => job.status != JobStatus::Archived,
            JobStatus::Archived => true,
        };
        if !allowed {
            return Err(DaemonError::Validation(format!(
                "cannot move job '{}' from {} to {}",
                name, job.status, target
            )));
        }

        let next_run = if target == JobStatus::Active {
            Trigger::for_job(&job)
                .map_err(DaemonError::Validation)?
                .next_fire(Utc::now(), None)
        } else {
            None
        };
        let updated = self.store.set_job_status(&job.id, target, next_run).await?;
        info!(job = name, status = %target, "Job status changed");
        Ok(updated)
    }

    pub async fn run_job(&self, name: &str) -> DaemonResult<JobExecutionRecord> {
        let job = self.store.get_job(name).await?;
        self.scheduler.run_now(&job).await
    }

    // ---- daemon ----

    pub async fn status(&self) -> DaemonResult<DaemonStatus> {
        Ok(DaemonStatus {
            version: env!("CARGO_PKG_VERSION"),
            pid: std::process::id(),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            bind: self.config.bind_addr(),
            data_dir: self.data_dir.display().to_string(),
            active_executions: self.active.load(Ordering::SeqCst),
            running_jobs: self.store.count_running_job_executions().await?,
            commands: self.store.count_commands().await?,
            jobs: self.store.count_jobs().await?,
        })
    }

    /// Cancel every in-flight execution, wait for their tasks to record the
    /// kill, then close out anything still queued or running.
    pub async fn shutdown(&self) -> DaemonResult<()> {
        info!("Daemon shutting down");
        self.cancel.cancel();
        self.slots.close();
        self.tracker.close();
        self.tracker.wait().await;
        let closed = self
            .store
            .kill_in_flight("shutdown", "daemon stopped before the attempt finished")
            .await?;
        if closed > 0 {
            warn!(count = closed, "Job executions killed at shutdown");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_service() -> Arc<DaemonService> {
    let store = crate::core::store::test_store();
    let mut config = DaemonConfig::default();
    config.daemon.scheduler_tick_secs = 1;
    Arc::new(
        DaemonService::with_store(config, std::env::temp_dir(), store)
            .await
            .expect("service"),
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn add(name: &str, code: &str) -> AddCommand {
        AddCommand {
            name: name.into(),
            code: code.into(),
            language: Some("shell".into()),
            group: None,
            tags: vec![],
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn hello_executes_and_counts() {
        let svc = test_service().await;
        let (cmd, warnings) = svc.add_command(add("hello", "echo \"hi\"")).await.unwrap();
        assert!(warnings.is_empty());
        assert_eq!(cmd.language, Language::Bash);

        let report = svc
            .execute(&cmd.id, None, ExecuteCommand::default())
            .await
            .unwrap();
        assert_eq!(report.status, ExecutionStatus::Success);
        assert_eq!(report.stdout, "hi\n");
        assert_eq!(report.exit_code, Some(0));

        let detail = svc.show("hello", None).await.unwrap();
        assert_eq!(detail.command.execution_count, 1);
        assert_eq!(detail.executions.len(), 1);
    }

    #[tokio::test]
    async fn sleeper_times_out_quickly() {
        let svc = test_service().await;
        let (cmd, _) = svc.add_command(add("sleeper", "sleep 10")).await.unwrap();
        let started = std::time::Instant::now();
        let report = svc
            .execute(
                &cmd.id,
                None,
                ExecuteCommand {
                    timeout_seconds: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(report.status, ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn search_finds_new_commands_after_add() {
        let svc = test_service().await;
        let mut req = add("process_data", "echo x");
        req.description = "Process CSV data with pandas".into();
        svc.add_command(req).await.unwrap();
        svc.add_command(add("other", "echo y")).await.unwrap();

        let hits = svc
            .search("data processing", 3, SearchMode::Similar)
            .await
            .unwrap();
        assert_eq!(hits[0].command.name, "process_data");

        svc.delete_command("process_data", None, false).await.unwrap();
        assert!(
            svc.search("data processing", 3, SearchMode::Similar)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn search_hits_carry_current_execution_counts() {
        let svc = test_service().await;
        let mut req = add("process_data", "echo x");
        req.description = "Process CSV data with pandas".into();
        let (cmd, _) = svc.add_command(req).await.unwrap();
        svc.execute(&cmd.id, None, ExecuteCommand::default())
            .await
            .unwrap();

        let similar = svc
            .search("data processing", 3, SearchMode::Similar)
            .await
            .unwrap();
        assert_eq!(similar[0].command.execution_count, 1);
        assert!(similar[0].command.last_executed.is_some());

        let text = svc.search("pandas", 3, SearchMode::Text).await.unwrap();
        assert_eq!(text[0].command.execution_count, 1);
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_store() {
        let svc = test_service().await;
        assert!(matches!(
            svc.add_command(add("  ", "echo")).await.unwrap_err(),
            DaemonError::Validation(_)
        ));
        let mut bad_lang = add("x", "echo");
        bad_lang.language = Some("cobol".into());
        assert!(svc.add_command(bad_lang).await.is_err());
        assert_eq!(svc.status().await.unwrap().commands, 0);
    }

    #[tokio::test]
    async fn edit_with_no_fields_is_rejected() {
        let svc = test_service().await;
        svc.add_command(add("e", "echo")).await.unwrap();
        assert!(matches!(
            svc.edit_command("e", None, EditCommand::default()).await.unwrap_err(),
            DaemonError::Validation(_)
        ));
        let (moved, _) = svc
            .edit_command(
                "e",
                None,
                EditCommand {
                    group: Some("tools".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.group.as_deref(), Some("tools"));
    }

    #[tokio::test]
    async fn job_lifecycle_transitions() {
        let svc = test_service().await;
        let (job, _) = svc
            .create_job(CreateJob {
                job_name: "nightly".into(),
                command: "echo ok".into(),
                command_kind: None,
                command_group: None,
                language: None,
                job_type: None,
                description: String::new(),
                cron_expression: Some("0 3 * * *".into()),
                interval_seconds: None,
                environment: Default::default(),
                working_directory: None,
                max_memory_mb: None,
                max_cpu_percent: None,
                timeout_seconds: None,
                max_retries: None,
                retry_delay_seconds: None,
                tags: vec![],
                priority: 0,
            })
            .await
            .unwrap();
        assert_eq!(job.timeout_seconds, DEFAULT_JOB_TIMEOUT_SECS);
        assert!(job.next_run.is_some());

        let paused = svc.set_job_status("nightly", JobStatus::Paused).await.unwrap();
        assert!(paused.next_run.is_none());
        assert!(svc.set_job_status("nightly", JobStatus::Paused).await.is_err());
        let resumed = svc.set_job_status("nightly", JobStatus::Active).await.unwrap();
        assert!(resumed.next_run.unwrap() > Utc::now());

        svc.set_job_status("nightly", JobStatus::Archived).await.unwrap();
        assert!(svc.set_job_status("nightly", JobStatus::Active).await.is_err());
        assert!(svc.run_job("nightly").await.is_err());
    }

    #[tokio::test]
    async fn shutdown_kills_running_executions() {
        let svc = test_service().await;
        let (cmd, _) = svc.add_command(add("long", "sleep 30")).await.unwrap();
        let runner = svc.clone();
        let id = cmd.id.clone();
        let pending = tokio::spawn(async move {
            runner.execute(&id, None, ExecuteCommand::default()).await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        svc.shutdown().await.unwrap();
        let report = pending.await.unwrap().unwrap();
        assert_eq!(report.status, ExecutionStatus::Killed);
    }
}
