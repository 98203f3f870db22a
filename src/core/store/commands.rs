use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::groups::{ensure_group, find_group_id};
use super::types::{
    CommandFilter, CommandPatch, CommandRecord, ExecutionRecord, NewCommand, NewExecution,
};
use super::{CommandStore, col_enum, col_json, col_opt_ts, col_ts, new_id, ts};
use crate::core::error::{DaemonError, DaemonResult};

const COMMAND_SELECT: &str = "SELECT c.id, c.name, c.description, c.code, c.language, g.name,
        c.group_id, c.tags, c.created_at, c.updated_at, c.execution_count,
        c.last_executed, c.is_active
    FROM commands c LEFT JOIN groups g ON g.id = c.group_id";

fn command_from_row(row: &Row<'_>) -> rusqlite::Result<CommandRecord> {
    Ok(CommandRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        code: row.get(3)?,
        language: col_enum(row, 4)?,
        group: row.get(5)?,
        group_id: row.get(6)?,
        tags: col_json(row, 7)?,
        created_at: col_ts(row, 8)?,
        updated_at: col_ts(row, 9)?,
        execution_count: row.get(10)?,
        last_executed: col_opt_ts(row, 11)?,
        is_active: row.get(12)?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        id: row.get(0)?,
        command_id: row.get(1)?,
        executed_at: col_ts(row, 2)?,
        status: col_enum(row, 3)?,
        output: row.get(4)?,
        error: row.get(5)?,
        exit_code: row.get(6)?,
        duration_ms: row.get(7)?,
    })
}

pub(super) fn fetch_command(db: &Connection, id: &str) -> rusqlite::Result<Option<CommandRecord>> {
    db.query_row(
        &format!("{COMMAND_SELECT} WHERE c.id = ?1"),
        params![id],
        command_from_row,
    )
    .optional()
}

/// Id of an active command with this name in this group (root when `None`).
fn active_name_owner(
    db: &Connection,
    name: &str,
    group_id: Option<&str>,
) -> rusqlite::Result<Option<String>> {
    db.query_row(
        "SELECT id FROM commands
         WHERE is_active = 1 AND name = ?1 AND IFNULL(group_id, '') = IFNULL(?2, '')",
        params![name, group_id],
        |row| row.get(0),
    )
    .optional()
}

impl CommandStore {
    pub async fn create_command(&self, new: NewCommand) -> DaemonResult<CommandRecord> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;

        let group_id = match &new.group {
            Some(group) => Some(ensure_group(&tx, group)?),
            None => None,
        };
        if active_name_owner(&tx, &new.name, group_id.as_deref())?.is_some() {
            return Err(DaemonError::duplicate(
                "command",
                &new.name,
                new.group.as_deref(),
            ));
        }

        let id = new_id();
        let now = ts(&Utc::now());
        tx.execute(
            "INSERT INTO commands (id, name, description, code, language, group_id, tags,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id,
                new.name,
                new.description,
                new.code,
                new.language.as_str(),
                group_id,
                serde_json::to_string(&new.tags)?,
                now,
            ],
        )?;
        let record = fetch_command(&tx, &id)?
            .ok_or_else(|| DaemonError::Infrastructure("inserted command vanished".into()))?;
        tx.commit()?;
        Ok(record)
    }

    /// Look a command up by id, or by name among active commands. An id
    /// match wins regardless of `group`.
    ///
    /// A bare name that exists in several groups is ambiguous and rejected;
    /// callers then have to say which group they mean.
    pub async fn get_command(&self, key: &str, group: Option<&str>) -> DaemonResult<CommandRecord> {
        let db = self.db.lock().await;
        if let Some(found) = fetch_command(&db, key)? {
            return Ok(found);
        }

        let mut stmt = db.prepare(&format!(
            "{COMMAND_SELECT} WHERE c.is_active = 1 AND c.name = ?1
                AND (?2 IS NULL OR g.name = ?2)
             ORDER BY c.id"
        ))?;
        let mut matches = stmt
            .query_map(params![key, group], command_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match matches.len() {
            0 => Err(DaemonError::not_found("command", key)),
            1 => Ok(matches.remove(0)),
            n => Err(DaemonError::Validation(format!(
                "command name '{}' exists in {} groups; specify a group",
                key, n
            ))),
        }
    }

    /// Commands sorted by name, then group, then id. Inactive rows only when
    /// the filter asks for them.
    pub async fn list_commands(&self, filter: &CommandFilter) -> DaemonResult<Vec<CommandRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "{COMMAND_SELECT}
             WHERE (?1 = 1 OR c.is_active = 1)
               AND (?2 IS NULL OR g.name = ?2)
               AND (?3 IS NULL OR c.language = ?3)
             ORDER BY c.name, IFNULL(g.name, ''), c.id"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    filter.include_inactive,
                    filter.group,
                    filter.language.map(|l| l.as_str()),
                ],
                command_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn count_commands(&self) -> DaemonResult<i64> {
        let db = self.db.lock().await;
        Ok(db.query_row(
            "SELECT COUNT(*) FROM commands WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?)
    }

    pub async fn edit_command(&self, id: &str, patch: CommandPatch) -> DaemonResult<CommandRecord> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;

        let current = fetch_command(&tx, id)?
            .filter(|c| c.is_active)
            .ok_or_else(|| DaemonError::not_found("command", id))?;

        let name = patch.name.clone().unwrap_or_else(|| current.name.clone());
        let (group_id, group_name) = match &patch.group {
            Some(Some(group)) => (Some(ensure_group(&tx, group)?), Some(group.clone())),
            Some(None) => (None, None),
            None => (current.group_id.clone(), current.group.clone()),
        };
        if let Some(owner) = active_name_owner(&tx, &name, group_id.as_deref())?
            && owner != current.id
        {
            return Err(DaemonError::duplicate("command", name, group_name.as_deref()));
        }

        let tags = patch.tags.as_ref().unwrap_or(&current.tags);
        tx.execute(
            "UPDATE commands SET name = ?2, description = ?3, code = ?4, language = ?5,
                group_id = ?6, tags = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                current.id,
                name,
                patch.description.as_ref().unwrap_or(&current.description),
                patch.code.as_ref().unwrap_or(&current.code),
                patch.language.unwrap_or(current.language).as_str(),
                group_id,
                serde_json::to_string(tags)?,
                ts(&Utc::now()),
            ],
        )?;
        let updated = fetch_command(&tx, &current.id)?
            .ok_or_else(|| DaemonError::not_found("command", id))?;
        tx.commit()?;
        Ok(updated)
    }

    /// Append one run to the history and bump the command's counters in the
    /// same transaction.
    pub async fn record_execution(
        &self,
        command_id: &str,
        run: NewExecution,
    ) -> DaemonResult<ExecutionRecord> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let now = ts(&Utc::now());

        let touched = tx.execute(
            "UPDATE commands SET execution_count = execution_count + 1, last_executed = ?2
             WHERE id = ?1",
            params![command_id, now],
        )?;
        if touched == 0 {
            return Err(DaemonError::not_found("command", command_id));
        }

        let id = new_id();
        tx.execute(
            "INSERT INTO executions (id, command_id, executed_at, status, output, error,
                exit_code, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                command_id,
                now,
                run.status.as_str(),
                run.output,
                run.error,
                run.exit_code,
                run.duration_ms,
            ],
        )?;
        let record = tx.query_row(
            "SELECT id, command_id, executed_at, status, output, error, exit_code, duration_ms
             FROM executions WHERE id = ?1",
            params![id],
            execution_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Newest first.
    pub async fn list_executions(
        &self,
        command_id: &str,
        limit: usize,
    ) -> DaemonResult<Vec<ExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, command_id, executed_at, status, output, error, exit_code, duration_ms
             FROM executions WHERE command_id = ?1
             ORDER BY executed_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![command_id, limit as i64], execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Soft delete hides the command but keeps it and its history. Hard
    /// delete removes both.
    pub async fn delete_command(&self, id: &str, hard: bool) -> DaemonResult<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let touched = if hard {
            tx.execute("DELETE FROM executions WHERE command_id = ?1", params![id])?;
            tx.execute("DELETE FROM commands WHERE id = ?1", params![id])?
        } else {
            tx.execute(
                "UPDATE commands SET is_active = 0, updated_at = ?2
                 WHERE id = ?1 AND is_active = 1",
                params![id, ts(&Utc::now())],
            )?
        };
        if touched == 0 {
            return Err(DaemonError::not_found("command", id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Whether a group of this name exists, so list filters can tell an
    /// unknown group from an empty one.
    pub async fn group_exists(&self, name: &str) -> DaemonResult<bool> {
        let db = self.db.lock().await;
        Ok(find_group_id(&db, name)?.is_some())
    }
}
