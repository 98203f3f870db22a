use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::store::{
    CommandRecord, ExecutionRecord, ExecutionStatus, JobCommandKind, JobExecutionRecord,
    JobRecord, JobType,
};

#[derive(Debug, Clone, Deserialize)]
pub struct AddCommand {
    pub name: String,
    pub code: String,
    /// Language name, `auto`, or absent for detection.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// Fields to change. An empty `group` moves the command to the root.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditCommand {
    pub name: Option<String>,
    pub code: Option<String>,
    pub language: Option<String>,
    pub description: Option<String>,
    pub group: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteCommand {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Text,
    Similar,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub job_name: String,
    /// Inline code, or the name of a stored command when `command_kind` is
    /// `stored`.
    pub command: String,
    #[serde(default)]
    pub command_kind: Option<JobCommandKind>,
    #[serde(default)]
    pub command_group: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub description: String,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub max_memory_mb: Option<i64>,
    pub max_cpu_percent: Option<f64>,
    pub timeout_seconds: Option<i64>,
    pub max_retries: Option<i64>,
    pub retry_delay_seconds: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: i64,
}

/// What a client sees after `execute`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub command_id: String,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
}

impl From<ExecutionRecord> for ExecutionReport {
    fn from(r: ExecutionRecord) -> Self {
        Self {
            execution_id: r.id,
            command_id: r.command_id,
            status: r.status,
            stdout: r.output,
            stderr: r.error,
            exit_code: r.exit_code,
            duration_ms: r.duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandDetail {
    pub command: CommandRecord,
    pub executions: Vec<ExecutionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job: JobRecord,
    pub latest_execution: Option<JobExecutionRecord>,
    /// Attempts leading to the latest one, oldest first.
    pub retry_chain: Vec<JobExecutionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub version: &'static str,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub bind: String,
    pub data_dir: String,
    pub active_executions: usize,
    pub running_jobs: i64,
    pub commands: i64,
    pub jobs: i64,
}
