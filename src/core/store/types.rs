use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::executor::Language;

/// Text-backed enums share one shape: a lowercase wire/db name per variant.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        concat!("invalid ", stringify!($name), " '{}'"),
                        other
                    )),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(ExecutionStatus {
    Success => "success",
    Error => "error",
    Timeout => "timeout",
    Killed => "killed",
});

text_enum!(JobType {
    Shell => "shell",
    System => "system",
    Scheduled => "scheduled",
    Service => "service",
    Ml => "ml",
    DataPipeline => "data-pipeline",
});

text_enum!(JobStatus {
    Active => "active",
    Paused => "paused",
    Disabled => "disabled",
    Archived => "archived",
});

text_enum!(JobCommandKind {
    Inline => "inline",
    Stored => "stored",
});

text_enum!(JobExecutionStatus {
    Queued => "queued",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Killed => "killed",
    Timeout => "timeout",
});

impl JobExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    /// Statuses that are eligible for another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }
}

impl From<ExecutionStatus> for JobExecutionStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => Self::Completed,
            ExecutionStatus::Error => Self::Failed,
            ExecutionStatus::Timeout => Self::Timeout,
            ExecutionStatus::Killed => Self::Killed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub code: String,
    pub language: Language,
    pub group: Option<String>,
    pub group_id: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub execution_count: i64,
    pub last_executed: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Input for `create_command`; already validated.
#[derive(Debug, Clone)]
pub struct NewCommand {
    pub name: String,
    pub code: String,
    pub language: Language,
    pub group: Option<String>,
    pub tags: Vec<String>,
    pub description: String,
}

/// Partial update applied by `edit_command`. `None` leaves a field alone;
/// `group: Some(None)` moves the command to the root.
#[derive(Debug, Clone, Default)]
pub struct CommandPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub code: Option<String>,
    pub language: Option<Language>,
    pub group: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

impl CommandPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.code.is_none()
            && self.language.is_none()
            && self.group.is_none()
            && self.tags.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandFilter {
    pub group: Option<String>,
    pub language: Option<Language>,
    pub include_inactive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parent_group_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupNode {
    #[serde(flatten)]
    pub group: GroupRecord,
    pub command_count: i64,
    pub children: Vec<GroupNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub command_id: String,
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub output: String,
    pub error: String,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
}

/// Everything `record_execution` persists for one interactive run.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub status: ExecutionStatus,
    pub output: String,
    pub error: String,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub job_name: String,
    pub description: String,
    pub command: String,
    pub command_kind: JobCommandKind,
    pub command_group: Option<String>,
    pub language: Language,
    pub job_type: JobType,
    pub status: JobStatus,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub max_memory_mb: Option<i64>,
    pub max_cpu_percent: Option<f64>,
    pub timeout_seconds: i64,
    pub max_retries: i64,
    pub retry_delay_seconds: i64,
    pub tags: Vec<String>,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for `create_job`. `next_run` is computed by the caller
/// from the trigger.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_name: String,
    pub description: String,
    pub command: String,
    pub command_kind: JobCommandKind,
    pub command_group: Option<String>,
    pub language: Language,
    pub job_type: JobType,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    pub next_run: Option<DateTime<Utc>>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub max_memory_mb: Option<i64>,
    pub max_cpu_percent: Option<f64>,
    pub timeout_seconds: i64,
    pub max_retries: i64,
    pub retry_delay_seconds: i64,
    pub tags: Vec<String>,
    pub priority: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobExecutionRecord {
    pub id: String,
    pub job_id: String,
    pub execution_id: String,
    pub status: JobExecutionStatus,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub queued_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub max_memory_mb: Option<f64>,
    pub avg_cpu_percent: Option<f64>,
    pub retry_count: i64,
    pub parent_execution_id: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

/// Terminal facts written by `finish_job_execution`.
#[derive(Debug, Clone)]
pub struct JobExecutionOutcome {
    pub status: JobExecutionStatus,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub stdout: String,
    pub stderr: String,
    pub max_memory_mb: Option<f64>,
    pub avg_cpu_percent: Option<f64>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

/// What `delete_group` removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupRemoval {
    pub groups_removed: usize,
    pub commands_deactivated: usize,
}
