use std::collections::{HashMap, HashSet};

use crate::core::store::JobExecutionRecord;

/// The attempts linked to `leaf` through `parent_execution_id`, oldest
/// first. A parent missing from the arena ends the walk, and so does a
/// repeated id.
pub fn retry_chain<'a>(
    arena: &'a HashMap<String, JobExecutionRecord>,
    leaf: &str,
) -> Vec<&'a JobExecutionRecord> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = arena.get(leaf);
    while let Some(run) = cursor {
        if !seen.insert(run.id.as_str()) {
            break;
        }
        chain.push(run);
        cursor = run
            .parent_execution_id
            .as_deref()
            .and_then(|parent| arena.get(parent));
    }
    chain.reverse();
    chain
}

/// `retry_count` for an attempt that follows `failed`: one more than the
/// number of retries already in its chain.
pub fn next_retry_count(arena: &HashMap<String, JobExecutionRecord>, failed: &str) -> i64 {
    retry_chain(arena, failed).len() as i64
}
