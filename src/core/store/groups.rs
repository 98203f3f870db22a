use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;

use super::types::{GroupNode, GroupRecord, GroupRemoval};
use super::{CommandStore, col_ts, new_id, ts};
use crate::core::error::{DaemonError, DaemonResult};

const GROUP_SELECT: &str =
    "SELECT id, name, description, parent_group_id, created_at FROM groups";

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<GroupRecord> {
    Ok(GroupRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        parent_group_id: row.get(3)?,
        created_at: col_ts(row, 4)?,
    })
}

pub(super) fn find_group_id(db: &Connection, name: &str) -> rusqlite::Result<Option<String>> {
    db.query_row(
        "SELECT id FROM groups WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
}

fn insert_group(
    db: &Connection,
    name: &str,
    description: &str,
    parent: Option<&str>,
) -> rusqlite::Result<String> {
    let id = new_id();
    db.execute(
        "INSERT INTO groups (id, name, description, parent_group_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, name, description, parent, ts(&Utc::now())],
    )?;
    Ok(id)
}

/// Id of the named group, creating it at the root when it does not exist.
pub(super) fn ensure_group(db: &Connection, name: &str) -> rusqlite::Result<String> {
    match find_group_id(db, name)? {
        Some(id) => Ok(id),
        None => insert_group(db, name, "", None),
    }
}

/// Ids of a group and every group below it, root first.
fn subtree_ids(db: &Connection, root: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = db.prepare(
        "WITH RECURSIVE sub(id, depth) AS (
             SELECT ?1, 0
             UNION ALL
             SELECT g.id, sub.depth + 1 FROM groups g JOIN sub ON g.parent_group_id = sub.id
         )
         SELECT id FROM sub ORDER BY depth",
    )?;
    stmt.query_map(params![root], |row| row.get(0))?
        .collect()
}

impl CommandStore {
    pub async fn create_group(
        &self,
        name: &str,
        description: &str,
        parent: Option<&str>,
    ) -> DaemonResult<GroupRecord> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        if find_group_id(&tx, name)?.is_some() {
            return Err(DaemonError::duplicate("group", name, None));
        }
        let parent_id = match parent {
            Some(p) => Some(find_group_id(&tx, p)?.ok_or_else(|| DaemonError::not_found("group", p))?),
            None => None,
        };
        let id = insert_group(&tx, name, description, parent_id.as_deref())?;
        let record = tx.query_row(
            &format!("{GROUP_SELECT} WHERE id = ?1"),
            params![id],
            group_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }

    pub async fn get_group(&self, name: &str) -> DaemonResult<GroupRecord> {
        let db = self.db.lock().await;
        db.query_row(
            &format!("{GROUP_SELECT} WHERE name = ?1"),
            params![name],
            group_from_row,
        )
        .optional()?
        .ok_or_else(|| DaemonError::not_found("group", name))
    }

    pub async fn list_groups(&self) -> DaemonResult<Vec<GroupRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!("{GROUP_SELECT} ORDER BY name"))?;
        let rows = stmt
            .query_map([], group_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Re-parent a group. Moving a group under itself or one of its own
    /// descendants is rejected so the parent chain stays acyclic.
    pub async fn move_group(&self, name: &str, new_parent: Option<&str>) -> DaemonResult<GroupRecord> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let id = find_group_id(&tx, name)?.ok_or_else(|| DaemonError::not_found("group", name))?;

        let parent_id = match new_parent {
            Some(p) => {
                let pid =
                    find_group_id(&tx, p)?.ok_or_else(|| DaemonError::not_found("group", p))?;
                if subtree_ids(&tx, &id)?.contains(&pid) {
                    return Err(DaemonError::Validation(format!(
                        "cannot move group '{}' under '{}': would create a cycle",
                        name, p
                    )));
                }
                Some(pid)
            }
            None => None,
        };

        tx.execute(
            "UPDATE groups SET parent_group_id = ?2 WHERE id = ?1",
            params![id, parent_id],
        )?;
        let record = tx.query_row(
            &format!("{GROUP_SELECT} WHERE id = ?1"),
            params![id],
            group_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Delete a group. Without `cascade` the group must have no child groups
    /// and no active commands. With `cascade` the whole subtree goes and its
    /// commands are deactivated. Commands left behind lose their group link.
    pub async fn delete_group(&self, name: &str, cascade: bool) -> DaemonResult<GroupRemoval> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let id = find_group_id(&tx, name)?.ok_or_else(|| DaemonError::not_found("group", name))?;
        let ids = subtree_ids(&tx, &id)?;

        if !cascade {
            if ids.len() > 1 {
                return Err(DaemonError::Validation(format!(
                    "group '{}' has child groups; delete with cascade or move them first",
                    name
                )));
            }
            let active: i64 = tx.query_row(
                "SELECT COUNT(*) FROM commands WHERE group_id = ?1 AND is_active = 1",
                params![id],
                |row| row.get(0),
            )?;
            if active > 0 {
                return Err(DaemonError::Validation(format!(
                    "group '{}' still holds {} active command(s)",
                    name, active
                )));
            }
        }

        let now = ts(&Utc::now());
        let mut deactivated = 0;
        for gid in &ids {
            deactivated += tx.execute(
                "UPDATE commands SET is_active = 0, updated_at = ?2
                 WHERE group_id = ?1 AND is_active = 1",
                params![gid, now],
            )?;
            tx.execute(
                "UPDATE commands SET group_id = NULL WHERE group_id = ?1",
                params![gid],
            )?;
        }
        // Deepest first so no parent row disappears under a live child.
        for gid in ids.iter().rev() {
            tx.execute("DELETE FROM groups WHERE id = ?1", params![gid])?;
        }
        tx.commit()?;

        Ok(GroupRemoval {
            groups_removed: ids.len(),
            commands_deactivated: deactivated,
        })
    }

    /// All groups as a forest, children sorted by name, each node carrying its
    /// active command count.
    pub async fn group_tree(&self) -> DaemonResult<Vec<GroupNode>> {
        let groups = self.list_groups().await?;
        let counts: HashMap<String, i64> = {
            let db = self.db.lock().await;
            let mut stmt = db.prepare(
                "SELECT group_id, COUNT(*) FROM commands
                 WHERE is_active = 1 AND group_id IS NOT NULL GROUP BY group_id",
            )?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?
        };

        let mut by_parent: HashMap<Option<String>, Vec<GroupRecord>> = HashMap::new();
        for group in groups {
            by_parent
                .entry(group.parent_group_id.clone())
                .or_default()
                .push(group);
        }
        Ok(build_level(None, &mut by_parent, &counts))
    }
}

fn build_level(
    parent: Option<String>,
    by_parent: &mut HashMap<Option<String>, Vec<GroupRecord>>,
    counts: &HashMap<String, i64>,
) -> Vec<GroupNode> {
    let Some(level) = by_parent.remove(&parent) else {
        return Vec::new();
    };
    level
        .into_iter()
        .map(|group| {
            let children = build_level(Some(group.id.clone()), by_parent, counts);
            GroupNode {
                command_count: counts.get(&group.id).copied().unwrap_or(0),
                group,
                children,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::super::types::{CommandFilter, NewCommand};
    use crate::core::executor::Language;

    use super::*;

    fn cmd(name: &str, group: &str) -> NewCommand {
        NewCommand {
            name: name.into(),
            code: "true".into(),
            language: Language::Bash,
            group: Some(group.into()),
            tags: vec![],
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn create_group_rejects_duplicates_and_unknown_parents() {
        let store = test_store();
        store.create_group("tools", "", None).await.unwrap();
        assert!(matches!(
            store.create_group("tools", "", None).await.unwrap_err(),
            DaemonError::DuplicateName { .. }
        ));
        assert!(matches!(
            store.create_group("x", "", Some("nope")).await.unwrap_err(),
            DaemonError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn adding_command_auto_creates_group() {
        let store = test_store();
        store.create_command(cmd("a", "fresh")).await.unwrap();
        let group = store.get_group("fresh").await.unwrap();
        assert_eq!(group.parent_group_id, None);
    }

    #[tokio::test]
    async fn move_rejects_cycles() {
        let store = test_store();
        store.create_group("a", "", None).await.unwrap();
        store.create_group("b", "", Some("a")).await.unwrap();
        store.create_group("c", "", Some("b")).await.unwrap();

        let err = store.move_group("a", Some("c")).await.unwrap_err();
        assert!(matches!(err, DaemonError::Validation(_)));
        let err = store.move_group("a", Some("a")).await.unwrap_err();
        assert!(matches!(err, DaemonError::Validation(_)));

        let moved = store.move_group("c", None).await.unwrap();
        assert_eq!(moved.parent_group_id, None);
    }

    #[tokio::test]
    async fn delete_without_cascade_refuses_populated_groups() {
        let store = test_store();
        store.create_group("parent", "", None).await.unwrap();
        store.create_group("child", "", Some("parent")).await.unwrap();
        assert!(store.delete_group("parent", false).await.is_err());

        store.create_command(cmd("x", "child")).await.unwrap();
        assert!(store.delete_group("child", false).await.is_err());
    }

    #[tokio::test]
    async fn cascade_removes_subtree_and_deactivates_commands() {
        let store = test_store();
        store.create_group("parent", "", None).await.unwrap();
        store.create_group("child", "", Some("parent")).await.unwrap();
        store.create_command(cmd("x", "child")).await.unwrap();
        store.create_command(cmd("y", "parent")).await.unwrap();

        let removed = store.delete_group("parent", true).await.unwrap();
        assert_eq!(removed.groups_removed, 2);
        assert_eq!(removed.commands_deactivated, 2);
        assert!(store.list_groups().await.unwrap().is_empty());
        assert!(
            store
                .list_commands(&CommandFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn tree_nests_children_with_counts() {
        let store = test_store();
        store.create_group("ops", "", None).await.unwrap();
        store.create_group("deploy", "", Some("ops")).await.unwrap();
        store.create_group("misc", "", None).await.unwrap();
        store.create_command(cmd("ship", "deploy")).await.unwrap();

        let tree = store.group_tree().await.unwrap();
        let names: Vec<&str> = tree.iter().map(|n| n.group.name.as_str()).collect();
        assert_eq!(names, vec!["misc", "ops"]);
        let ops = &tree[1];
        assert_eq!(ops.children.len(), 1);
        assert_eq!(ops.children[0].group.name, "deploy");
        assert_eq!(ops.children[0].command_count, 1);
        assert_eq!(ops.command_count, 0);
    }
}
