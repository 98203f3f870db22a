use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use serde::Deserialize;

use super::super::AppState;
use super::{ApiResult, DEFAULT_HISTORY_LIMIT, DEFAULT_TOP_K, GroupQuery, LimitQuery, body, query};
use crate::core::daemon::{AddCommand, EditCommand, ExecuteCommand, SearchMode};
use crate::core::error::DaemonError;
use crate::core::executor::Language;
use crate::core::store::CommandFilter;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    group: Option<String>,
    language: Option<String>,
    #[serde(default)]
    include_inactive: bool,
}

pub async fn list_commands(
    State(state): State<AppState>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let language = match params.language.as_deref() {
        Some(l) => Some(l.parse::<Language>().map_err(DaemonError::Validation)?),
        None => None,
    };
    let commands = state
        .service
        .list(CommandFilter {
            group: params.group.filter(|g| !g.trim().is_empty()),
            language,
            include_inactive: params.include_inactive,
        })
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "commands": commands
    })))
}

pub async fn add_command(
    State(state): State<AppState>,
    payload: Result<Json<AddCommand>, JsonRejection>,
) -> ApiResult {
    let (command, warnings) = state.service.add_command(body(payload)?).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "command": command,
        "warnings": warnings
    })))
}

pub async fn show_command(
    Path(key): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<GroupQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let detail = state.service.show(&key, params.group()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "command": detail.command,
        "executions": detail.executions
    })))
}

pub async fn edit_command(
    Path(key): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<GroupQuery>, QueryRejection>,
    payload: Result<Json<EditCommand>, JsonRejection>,
) -> ApiResult {
    let params = query(params)?;
    let (command, warnings) = state
        .service
        .edit_command(&key, params.group(), body(payload)?)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "command": command,
        "warnings": warnings
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    group: Option<String>,
    #[serde(default)]
    hard: bool,
}

pub async fn delete_command(
    Path(key): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<DeleteQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let group = params.group.as_deref().filter(|g| !g.trim().is_empty());
    let id = state.service.delete_command(&key, group, params.hard).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "deleted": id,
        "hard": params.hard
    })))
}

pub async fn execute_command(
    Path(key): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<GroupQuery>, QueryRejection>,
    payload: Result<Json<ExecuteCommand>, JsonRejection>,
) -> ApiResult {
    let params = query(params)?;
    let report = state
        .service
        .execute(&key, params.group(), body(payload)?)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "execution": report
    })))
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    group: Option<String>,
    top_k: Option<usize>,
}

pub async fn similar_commands(
    Path(key): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<SimilarQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let group = params.group.as_deref().filter(|g| !g.trim().is_empty());
    let results = state
        .service
        .similar(&key, group, params.top_k.unwrap_or(DEFAULT_TOP_K))
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "results": results
    })))
}

pub async fn command_executions(
    Path(key): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let group = params.group.as_deref().filter(|g| !g.trim().is_empty());
    let executions = state
        .service
        .executions(&key, group, params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "executions": executions
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
    top_k: Option<usize>,
    #[serde(default)]
    mode: SearchMode,
}

pub async fn search_commands(
    State(state): State<AppState>,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let results = state
        .service
        .search(&params.q, params.top_k.unwrap_or(DEFAULT_TOP_K), params.mode)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "mode": params.mode,
        "results": results
    })))
}
