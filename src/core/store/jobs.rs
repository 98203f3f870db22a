use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::types::{JobRecord, JobStatus, NewJob};
use super::{CommandStore, col_enum, col_json, col_opt_ts, col_ts, new_id, opt_ts, ts};
use crate::core::error::{DaemonError, DaemonResult};

const JOB_SELECT: &str = "SELECT id, job_name, description, command, command_kind,
        command_group, language, job_type, status, cron_expression, interval_seconds,
        next_run, last_run, environment, working_directory, max_memory_mb,
        max_cpu_percent, timeout_seconds, max_retries, retry_delay_seconds, tags,
        priority, created_at, updated_at
    FROM jobs";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        job_name: row.get(1)?,
        description: row.get(2)?,
        command: row.get(3)?,
        command_kind: col_enum(row, 4)?,
        command_group: row.get(5)?,
        language: col_enum(row, 6)?,
        job_type: col_enum(row, 7)?,
        status: col_enum(row, 8)?,
        cron_expression: row.get(9)?,
        interval_seconds: row.get(10)?,
        next_run: col_opt_ts(row, 11)?,
        last_run: col_opt_ts(row, 12)?,
        environment: col_json(row, 13)?,
        working_directory: row.get(14)?,
        max_memory_mb: row.get(15)?,
        max_cpu_percent: row.get(16)?,
        timeout_seconds: row.get(17)?,
        max_retries: row.get(18)?,
        retry_delay_seconds: row.get(19)?,
        tags: col_json(row, 20)?,
        priority: row.get(21)?,
        created_at: col_ts(row, 22)?,
        updated_at: col_ts(row, 23)?,
    })
}

pub(super) fn fetch_job(db: &Connection, id: &str) -> rusqlite::Result<Option<JobRecord>> {
    db.query_row(
        &format!("{JOB_SELECT} WHERE id = ?1"),
        params![id],
        job_from_row,
    )
    .optional()
}

impl CommandStore {
    pub async fn create_job(&self, new: NewJob) -> DaemonResult<JobRecord> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let taken: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs WHERE job_name = ?1",
                params![new.job_name],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(DaemonError::duplicate("job", &new.job_name, None));
        }

        let id = new_id();
        let now = ts(&Utc::now());
        tx.execute(
            "INSERT INTO jobs (id, job_name, description, command, command_kind, command_group,
                language, job_type, status, cron_expression, interval_seconds, next_run,
                environment, working_directory, max_memory_mb, max_cpu_percent,
                timeout_seconds, max_retries, retry_delay_seconds, tags, priority,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22, ?22)",
            params![
                id,
                new.job_name,
                new.description,
                new.command,
                new.command_kind.as_str(),
                new.command_group,
                new.language.as_str(),
                new.job_type.as_str(),
                JobStatus::Active.as_str(),
                new.cron_expression,
                new.interval_seconds,
                opt_ts(&new.next_run),
                serde_json::to_string(&new.environment)?,
                new.working_directory,
                new.max_memory_mb,
                new.max_cpu_percent,
                new.timeout_seconds,
                new.max_retries,
                new.retry_delay_seconds,
                serde_json::to_string(&new.tags)?,
                new.priority,
                now,
            ],
        )?;
        let record = fetch_job(&tx, &id)?
            .ok_or_else(|| DaemonError::Infrastructure("inserted job vanished".into()))?;
        tx.commit()?;
        Ok(record)
    }

    pub async fn get_job(&self, name: &str) -> DaemonResult<JobRecord> {
        let db = self.db.lock().await;
        db.query_row(
            &format!("{JOB_SELECT} WHERE job_name = ?1"),
            params![name],
            job_from_row,
        )
        .optional()?
        .ok_or_else(|| DaemonError::not_found("job", name))
    }

    pub async fn get_job_by_id(&self, id: &str) -> DaemonResult<JobRecord> {
        let db = self.db.lock().await;
        fetch_job(&db, id)?.ok_or_else(|| DaemonError::not_found("job", id))
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> DaemonResult<Vec<JobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "{JOB_SELECT} WHERE (?1 IS NULL OR status = ?1) ORDER BY job_name"
        ))?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str())], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn count_jobs(&self) -> DaemonResult<i64> {
        let db = self.db.lock().await;
        Ok(db.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?)
    }

    /// Change a job's status and, optionally, its `next_run`.
    pub async fn set_job_status(
        &self,
        id: &str,
        status: JobStatus,
        next_run: Option<DateTime<Utc>>,
    ) -> DaemonResult<JobRecord> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let touched = tx.execute(
            "UPDATE jobs SET status = ?2, next_run = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), opt_ts(&next_run), ts(&Utc::now())],
        )?;
        if touched == 0 {
            return Err(DaemonError::not_found("job", id));
        }
        if status != JobStatus::Active {
            // Attempts still waiting to start (pending retries) go with the
            // schedule; a running attempt finishes on its own.
            let now = ts(&Utc::now());
            tx.execute(
                "UPDATE job_executions SET status = 'killed', started_at = COALESCE(started_at, ?2),
                    completed_at = ?2, duration_ms = 0, error_type = ?3, error_message = ?4
                 WHERE job_id = ?1 AND status = 'queued'",
                params![
                    id,
                    now,
                    format!("job_{}", status.as_str()),
                    format!("job is {}; attempt not started", status),
                ],
            )?;
        }
        let record = fetch_job(&tx, id)?.ok_or_else(|| DaemonError::not_found("job", id))?;
        tx.commit()?;
        Ok(record)
    }

    /// Remove a job and, through the foreign key, its execution history.
    pub async fn delete_job(&self, id: &str) -> DaemonResult<()> {
        let db = self.db.lock().await;
        if db.execute("DELETE FROM jobs WHERE id = ?1", params![id])? == 0 {
            return Err(DaemonError::not_found("job", id));
        }
        Ok(())
    }

    /// Active jobs whose trigger has come due, highest priority first.
    pub async fn due_jobs(&self, now: DateTime<Utc>) -> DaemonResult<Vec<JobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "{JOB_SELECT}
             WHERE status = 'active' AND next_run IS NOT NULL AND next_run <= ?1
             ORDER BY priority DESC, next_run, job_name"
        ))?;
        let rows = stmt
            .query_map(params![ts(&now)], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Move the trigger forward when a job fires, before the attempt ends.
    pub async fn schedule_next_run(
        &self,
        id: &str,
        next_run: Option<DateTime<Utc>>,
    ) -> DaemonResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE jobs SET next_run = ?2 WHERE id = ?1",
            params![id, opt_ts(&next_run)],
        )?;
        Ok(())
    }

    /// Stamp a finished run and store the recomputed trigger in one update.
    pub async fn record_job_run(
        &self,
        id: &str,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> DaemonResult<()> {
        let db = self.db.lock().await;
        let touched = db.execute(
            "UPDATE jobs SET last_run = ?2, next_run = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, ts(&last_run), opt_ts(&next_run), ts(&Utc::now())],
        )?;
        if touched == 0 {
            return Err(DaemonError::not_found("job", id));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::super::test_store;
    use super::super::types::{JobCommandKind, JobType};
    use super::*;
    use crate::core::executor::Language;
    use std::collections::BTreeMap;

    pub(crate) fn new_job(name: &str) -> NewJob {
        NewJob {
            job_name: name.into(),
            description: String::new(),
            command: "exit 1".into(),
            command_kind: JobCommandKind::Inline,
            command_group: None,
            language: Language::Bash,
            job_type: JobType::Shell,
            cron_expression: None,
            interval_seconds: Some(60),
            next_run: Some(Utc::now()),
            environment: BTreeMap::from([("MODE".to_string(), "test".to_string())]),
            working_directory: None,
            max_memory_mb: None,
            max_cpu_percent: None,
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 1,
            tags: vec!["nightly".into()],
            priority: 0,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_job() {
        let store = test_store();
        let job = store.create_job(new_job("backup")).await.unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.environment.get("MODE").map(String::as_str), Some("test"));

        let by_name = store.get_job("backup").await.unwrap();
        assert_eq!(by_name, job);
        assert!(matches!(
            store.create_job(new_job("backup")).await.unwrap_err(),
            DaemonError::DuplicateName { .. }
        ));
    }

    #[tokio::test]
    async fn schema_rejects_cron_and_interval_together() {
        let store = test_store();
        let mut job = new_job("both");
        job.cron_expression = Some("0 * * * * *".into());
        assert!(store.create_job(job).await.is_err());
    }

    #[tokio::test]
    async fn due_jobs_skips_paused_and_future() {
        let store = test_store();
        let now = Utc::now();
        let due = store.create_job(new_job("due")).await.unwrap();

        let mut later = new_job("later");
        later.next_run = Some(now + chrono::Duration::hours(1));
        store.create_job(later).await.unwrap();

        let paused = store.create_job(new_job("paused")).await.unwrap();
        store
            .set_job_status(&paused.id, JobStatus::Paused, None)
            .await
            .unwrap();

        let found = store.due_jobs(now + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn pausing_closes_queued_attempts() {
        use super::super::{EnqueueRequest, JobExecutionStatus};

        let store = test_store();
        let job = store.create_job(new_job("retrying")).await.unwrap();
        let pending = store
            .enqueue_if_idle(EnqueueRequest {
                job_id: &job.id,
                execution_id: "retrying-1".into(),
                retry_count: 1,
                parent_execution_id: None,
                not_before: Utc::now() + chrono::Duration::seconds(30),
            })
            .await
            .unwrap()
            .unwrap();

        store
            .set_job_status(&job.id, JobStatus::Paused, None)
            .await
            .unwrap();

        let latest = store.latest_job_execution(&job.id).await.unwrap().unwrap();
        assert_eq!(latest.id, pending.id);
        assert_eq!(latest.status, JobExecutionStatus::Killed);
        assert_eq!(latest.error_type.as_deref(), Some("job_paused"));
        assert!(!store.has_in_flight(&job.id).await.unwrap());
        assert!(
            store
                .queued_due(Utc::now() + chrono::Duration::minutes(5))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn record_job_run_moves_trigger() {
        let store = test_store();
        let job = store.create_job(new_job("tick")).await.unwrap();
        let ran = Utc::now();
        let next = ran + chrono::Duration::seconds(60);
        store.record_job_run(&job.id, ran, Some(next)).await.unwrap();

        let after = store.get_job_by_id(&job.id).await.unwrap();
        assert!(after.last_run.is_some());
        assert!(after.next_run.unwrap() > ran);
        assert!(store.due_jobs(ran).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_job_is_not_found_twice() {
        let store = test_store();
        let job = store.create_job(new_job("gone")).await.unwrap();
        store.delete_job(&job.id).await.unwrap();
        assert!(matches!(
            store.delete_job(&job.id).await.unwrap_err(),
            DaemonError::NotFound { .. }
        ));
        assert_eq!(store.count_jobs().await.unwrap(), 0);
    }
}
