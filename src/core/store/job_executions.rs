use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;

use super::types::{JobExecutionOutcome, JobExecutionRecord, JobExecutionStatus};
use super::{CommandStore, col_enum, col_opt_ts, col_ts, new_id, ts};
use crate::core::error::{DaemonError, DaemonResult};

const RUN_SELECT: &str = "SELECT id, job_id, execution_id, status, exit_code, pid, queued_at,
        not_before, started_at, completed_at, duration_ms, stdout, stderr, max_memory_mb,
        avg_cpu_percent, retry_count, parent_execution_id, error_type, error_message
    FROM job_executions";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<JobExecutionRecord> {
    Ok(JobExecutionRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        execution_id: row.get(2)?,
        status: col_enum(row, 3)?,
        exit_code: row.get(4)?,
        pid: row.get(5)?,
        queued_at: col_ts(row, 6)?,
        not_before: col_ts(row, 7)?,
        started_at: col_opt_ts(row, 8)?,
        completed_at: col_opt_ts(row, 9)?,
        duration_ms: row.get(10)?,
        stdout: row.get(11)?,
        stderr: row.get(12)?,
        max_memory_mb: row.get(13)?,
        avg_cpu_percent: row.get(14)?,
        retry_count: row.get(15)?,
        parent_execution_id: row.get(16)?,
        error_type: row.get(17)?,
        error_message: row.get(18)?,
    })
}

fn fetch_run(db: &Connection, id: &str) -> rusqlite::Result<Option<JobExecutionRecord>> {
    db.query_row(
        &format!("{RUN_SELECT} WHERE id = ?1"),
        params![id],
        run_from_row,
    )
    .optional()
}

fn in_flight(db: &Connection, job_id: &str) -> rusqlite::Result<bool> {
    db.query_row(
        "SELECT EXISTS(SELECT 1 FROM job_executions
             WHERE job_id = ?1 AND status IN ('queued', 'running'))",
        params![job_id],
        |row| row.get(0),
    )
}

/// Where a new attempt comes from.
#[derive(Debug, Clone)]
pub struct EnqueueRequest<'a> {
    pub job_id: &'a str,
    pub execution_id: String,
    pub retry_count: i64,
    pub parent_execution_id: Option<&'a str>,
    pub not_before: DateTime<Utc>,
}

impl CommandStore {
    /// Insert a `queued` attempt unless the job already has one queued or
    /// running. Returns `None` when the job is busy, which is how the
    /// scheduler keeps a job to one attempt in flight.
    pub async fn enqueue_if_idle(
        &self,
        req: EnqueueRequest<'_>,
    ) -> DaemonResult<Option<JobExecutionRecord>> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        if in_flight(&tx, req.job_id)? {
            return Ok(None);
        }

        let id = new_id();
        tx.execute(
            "INSERT INTO job_executions (id, job_id, execution_id, status, queued_at,
                not_before, retry_count, parent_execution_id)
             VALUES (?1, ?2, ?3, 'queued', ?4, ?5, ?6, ?7)",
            params![
                id,
                req.job_id,
                req.execution_id,
                ts(&Utc::now()),
                ts(&req.not_before),
                req.retry_count,
                req.parent_execution_id,
            ],
        )?;
        let record = fetch_run(&tx, &id)?;
        tx.commit()?;
        Ok(record)
    }

    /// Move a queued attempt to `running`. Only one caller can win the
    /// claim, so an attempt is never dispatched twice.
    pub async fn claim_job_execution(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> DaemonResult<bool> {
        let db = self.db.lock().await;
        let claimed = db.execute(
            "UPDATE job_executions SET status = 'running', started_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![id, ts(&started_at)],
        )?;
        Ok(claimed == 1)
    }

    pub async fn set_job_execution_pid(&self, id: &str, pid: u32) -> DaemonResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE job_executions SET pid = ?2 WHERE id = ?1",
            params![id, pid],
        )?;
        Ok(())
    }

    /// Write the terminal state of an attempt. An attempt that already
    /// reached a terminal state (shutdown got there first) is left alone.
    pub async fn finish_job_execution(
        &self,
        id: &str,
        outcome: JobExecutionOutcome,
    ) -> DaemonResult<JobExecutionRecord> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let duration_ms = (outcome.completed_at - outcome.started_at)
            .num_milliseconds()
            .max(0);
        tx.execute(
            "UPDATE job_executions SET status = ?2, exit_code = ?3, pid = COALESCE(?4, pid),
                started_at = COALESCE(started_at, ?5), completed_at = ?6, duration_ms = ?7,
                stdout = ?8, stderr = ?9, max_memory_mb = ?10, avg_cpu_percent = ?11,
                error_type = ?12, error_message = ?13
             WHERE id = ?1 AND status IN ('queued', 'running')",
            params![
                id,
                outcome.status.as_str(),
                outcome.exit_code,
                outcome.pid,
                ts(&outcome.started_at),
                ts(&outcome.completed_at),
                duration_ms,
                outcome.stdout,
                outcome.stderr,
                outcome.max_memory_mb,
                outcome.avg_cpu_percent,
                outcome.error_type,
                outcome.error_message,
            ],
        )?;
        let record =
            fetch_run(&tx, id)?.ok_or_else(|| DaemonError::not_found("job execution", id))?;
        tx.commit()?;
        Ok(record)
    }

    /// Queued attempts whose `not_before` has passed, oldest first.
    pub async fn queued_due(&self, now: DateTime<Utc>) -> DaemonResult<Vec<JobExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "{RUN_SELECT} WHERE status = 'queued' AND not_before <= ?1
             ORDER BY not_before, queued_at"
        ))?;
        let rows = stmt
            .query_map(params![ts(&now)], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn latest_job_execution(
        &self,
        job_id: &str,
    ) -> DaemonResult<Option<JobExecutionRecord>> {
        let db = self.db.lock().await;
        Ok(db
            .query_row(
                &format!(
                    "{RUN_SELECT} WHERE job_id = ?1 ORDER BY queued_at DESC, rowid DESC LIMIT 1"
                ),
                params![job_id],
                run_from_row,
            )
            .optional()?)
    }

    /// Newest first.
    pub async fn list_job_executions(
        &self,
        job_id: &str,
        limit: usize,
    ) -> DaemonResult<Vec<JobExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "{RUN_SELECT} WHERE job_id = ?1 ORDER BY queued_at DESC, rowid DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![job_id, limit as i64], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every attempt of one job keyed by id, for walking retry chains.
    pub async fn job_execution_arena(
        &self,
        job_id: &str,
    ) -> DaemonResult<HashMap<String, JobExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!("{RUN_SELECT} WHERE job_id = ?1"))?;
        let rows = stmt
            .query_map(params![job_id], run_from_row)?
            .map(|r| r.map(|run| (run.id.clone(), run)))
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }

    pub async fn has_in_flight(&self, job_id: &str) -> DaemonResult<bool> {
        let db = self.db.lock().await;
        Ok(in_flight(&db, job_id)?)
    }

    pub async fn count_running_job_executions(&self) -> DaemonResult<i64> {
        let db = self.db.lock().await;
        Ok(db.query_row(
            "SELECT COUNT(*) FROM job_executions WHERE status = 'running'",
            [],
            |row| row.get(0),
        )?)
    }

    /// Mark every queued or running attempt `killed`. Used on shutdown and
    /// by the startup recovery pass for rows a crashed daemon left behind.
    pub async fn kill_in_flight(&self, error_type: &str, message: &str) -> DaemonResult<usize> {
        let db = self.db.lock().await;
        let now = ts(&Utc::now());
        let killed = db.execute(
            "UPDATE job_executions SET status = ?1, completed_at = ?2,
                started_at = COALESCE(started_at, ?2),
                duration_ms = CAST((julianday(?2) - julianday(COALESCE(started_at, ?2)))
                    * 86400000 AS INTEGER),
                error_type = ?3, error_message = ?4
             WHERE status IN ('queued', 'running')",
            params![JobExecutionStatus::Killed.as_str(), now, error_type, message],
        )?;
        Ok(killed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::jobs::tests::new_job;
    use super::super::test_store;
    use super::*;

    fn request<'a>(job_id: &'a str, n: i64, parent: Option<&'a str>) -> EnqueueRequest<'a> {
        EnqueueRequest {
            job_id,
            execution_id: format!("run-{}", n),
            retry_count: n,
            parent_execution_id: parent,
            not_before: Utc::now(),
        }
    }

    fn outcome(status: JobExecutionStatus) -> JobExecutionOutcome {
        let started = Utc::now();
        JobExecutionOutcome {
            status,
            exit_code: Some(1),
            pid: Some(4242),
            started_at: started,
            completed_at: started + chrono::Duration::milliseconds(250),
            stdout: String::new(),
            stderr: "boom".into(),
            max_memory_mb: Some(3.5),
            avg_cpu_percent: Some(1.0),
            error_type: Some("exit_code".into()),
            error_message: None,
        }
    }

    #[tokio::test]
    async fn only_one_attempt_in_flight_per_job() {
        let store = test_store();
        let job = store.create_job(new_job("once")).await.unwrap();

        let first = store.enqueue_if_idle(request(&job.id, 0, None)).await.unwrap();
        assert!(first.is_some());
        let second = store.enqueue_if_idle(request(&job.id, 1, None)).await.unwrap();
        assert!(second.is_none());
        assert!(store.has_in_flight(&job.id).await.unwrap());
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_finish_computes_duration() {
        let store = test_store();
        let job = store.create_job(new_job("claim")).await.unwrap();
        let run = store
            .enqueue_if_idle(request(&job.id, 0, None))
            .await
            .unwrap()
            .unwrap();

        assert!(store.claim_job_execution(&run.id, Utc::now()).await.unwrap());
        assert!(!store.claim_job_execution(&run.id, Utc::now()).await.unwrap());

        let done = store
            .finish_job_execution(&run.id, outcome(JobExecutionStatus::Failed))
            .await
            .unwrap();
        assert_eq!(done.status, JobExecutionStatus::Failed);
        assert_eq!(done.duration_ms, Some(250));
        assert!(!store.has_in_flight(&job.id).await.unwrap());
    }

    #[tokio::test]
    async fn queued_due_respects_not_before() {
        let store = test_store();
        let job = store.create_job(new_job("later")).await.unwrap();
        let mut req = request(&job.id, 1, None);
        req.not_before = Utc::now() + chrono::Duration::seconds(30);
        store.enqueue_if_idle(req).await.unwrap();

        assert!(store.queued_due(Utc::now()).await.unwrap().is_empty());
        let later = Utc::now() + chrono::Duration::seconds(31);
        assert_eq!(store.queued_due(later).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn kill_in_flight_terminates_leftovers() {
        let store = test_store();
        let job = store.create_job(new_job("crash")).await.unwrap();
        let run = store
            .enqueue_if_idle(request(&job.id, 0, None))
            .await
            .unwrap()
            .unwrap();
        store.claim_job_execution(&run.id, Utc::now()).await.unwrap();

        assert_eq!(store.kill_in_flight("shutdown", "daemon stopped").await.unwrap(), 1);
        let latest = store.latest_job_execution(&job.id).await.unwrap().unwrap();
        assert_eq!(latest.status, JobExecutionStatus::Killed);
        assert_eq!(latest.error_type.as_deref(), Some("shutdown"));
        assert!(latest.completed_at.is_some());

        // A late finish from the dispatch task does not overwrite the kill.
        let after = store
            .finish_job_execution(&run.id, outcome(JobExecutionStatus::Failed))
            .await
            .unwrap();
        assert_eq!(after.status, JobExecutionStatus::Killed);
    }

    #[tokio::test]
    async fn arena_holds_the_whole_chain() {
        let store = test_store();
        let job = store.create_job(new_job("chain")).await.unwrap();
        let first = store
            .enqueue_if_idle(request(&job.id, 0, None))
            .await
            .unwrap()
            .unwrap();
        store
            .finish_job_execution(&first.id, outcome(JobExecutionStatus::Failed))
            .await
            .unwrap();
        let retry = store
            .enqueue_if_idle(request(&job.id, 1, Some(&first.id)))
            .await
            .unwrap()
            .unwrap();

        let arena = store.job_execution_arena(&job.id).await.unwrap();
        assert_eq!(arena.len(), 2);
        assert_eq!(
            arena[&retry.id].parent_execution_id.as_deref(),
            Some(first.id.as_str())
        );
        assert_eq!(store.list_job_executions(&job.id, 10).await.unwrap().len(), 2);
    }
}
