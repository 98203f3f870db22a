mod commands;
mod groups;
mod job_executions;
mod jobs;
pub mod types;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row, types::Type};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::error::DaemonResult;
use crate::platform::{NativePlatform, Platform};

pub use job_executions::EnqueueRequest;
pub use types::*;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    parent_group_id TEXT REFERENCES groups(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS commands (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    code TEXT NOT NULL,
    language TEXT NOT NULL,
    group_id TEXT REFERENCES groups(id),
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    execution_count INTEGER NOT NULL DEFAULT 0,
    last_executed TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_commands_active_name
    ON commands(name, IFNULL(group_id, '')) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    command_id TEXT NOT NULL REFERENCES commands(id) ON DELETE CASCADE,
    executed_at TEXT NOT NULL,
    status TEXT NOT NULL,
    output TEXT NOT NULL DEFAULT '',
    error TEXT NOT NULL DEFAULT '',
    exit_code INTEGER,
    duration_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_executions_command
    ON executions(command_id, executed_at);

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    job_name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    command TEXT NOT NULL,
    command_kind TEXT NOT NULL,
    command_group TEXT,
    language TEXT NOT NULL,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    cron_expression TEXT,
    interval_seconds INTEGER,
    next_run TEXT,
    last_run TEXT,
    environment TEXT NOT NULL DEFAULT '{}',
    working_directory TEXT,
    max_memory_mb INTEGER,
    max_cpu_percent REAL,
    timeout_seconds INTEGER NOT NULL CHECK (timeout_seconds > 0),
    max_retries INTEGER NOT NULL DEFAULT 0,
    retry_delay_seconds INTEGER NOT NULL DEFAULT 60,
    tags TEXT NOT NULL DEFAULT '[]',
    priority INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (cron_expression IS NULL OR interval_seconds IS NULL)
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_next_run ON jobs(status, next_run);

CREATE TABLE IF NOT EXISTS job_executions (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    execution_id TEXT NOT NULL,
    status TEXT NOT NULL,
    exit_code INTEGER,
    pid INTEGER,
    queued_at TEXT NOT NULL,
    not_before TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    duration_ms INTEGER,
    stdout TEXT NOT NULL DEFAULT '',
    stderr TEXT NOT NULL DEFAULT '',
    max_memory_mb REAL,
    avg_cpu_percent REAL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    parent_execution_id TEXT,
    error_type TEXT,
    error_message TEXT,
    UNIQUE (job_id, execution_id)
);

CREATE INDEX IF NOT EXISTS idx_job_executions_status
    ON job_executions(status, not_before);
CREATE INDEX IF NOT EXISTS idx_job_executions_job
    ON job_executions(job_id, queued_at);
";

/// Durable home of commands, groups, jobs and their run history.
///
/// One SQLite connection behind an async mutex. Every public operation takes
/// the lock for a single short transaction and never holds it across a
/// subprocess.
#[derive(Clone)]
pub struct CommandStore {
    db: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl CommandStore {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> DaemonResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            tokio::fs::create_dir_all(&data_dir).await?;
        }
        NativePlatform::restrict_dir_permissions(&data_dir);

        let db_path = data_dir.join("scriptd.db");
        let db = Connection::open(&db_path)?;
        NativePlatform::restrict_file_permissions(&db_path);
        db.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::init(db, Some(db_path))
    }

    pub fn open_in_memory() -> DaemonResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(db: Connection, path: Option<PathBuf>) -> DaemonResult<Self> {
        db.pragma_update(None, "foreign_keys", "ON")?;
        db.execute_batch(SCHEMA)?;
        if let Some(p) = &path {
            info!("Command store ready at {:?}", p);
        }
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Fresh in-memory store for unit tests.
#[cfg(test)]
pub fn test_store() -> CommandStore {
    CommandStore::open_in_memory().expect("in-memory store")
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fixed-width UTC timestamps so lexical order in SQL matches time order.
pub(crate) fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn opt_ts(t: &Option<DateTime<Utc>>) -> Option<String> {
    t.as_ref().map(ts)
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e.to_string()))
}

pub(crate) fn col_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

pub(crate) fn col_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(idx, &r)).transpose()
}

pub(crate) fn col_enum<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn col_json<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e.to_string()))
}
