use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use serde::Deserialize;

use super::super::AppState;
use super::{ApiResult, body, query};
use crate::core::daemon::CreateGroup;

pub async fn group_tree(State(state): State<AppState>) -> ApiResult {
    let groups = state.service.groups().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "groups": groups
    })))
}

pub async fn create_group(
    State(state): State<AppState>,
    payload: Result<Json<CreateGroup>, JsonRejection>,
) -> ApiResult {
    let (group, warnings) = state.service.create_group(body(payload)?).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "group": group,
        "warnings": warnings
    })))
}

/// A missing or empty `parent` moves the group to the root.
#[derive(Debug, Deserialize)]
pub struct MoveGroupRequest {
    parent: Option<String>,
}

pub async fn move_group(
    Path(name): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<MoveGroupRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let group = state.service.move_group(&name, req.parent.as_deref()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "group": group
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteGroupQuery {
    #[serde(default)]
    cascade: bool,
}

pub async fn delete_group(
    Path(name): Path<String>,
    State(state): State<AppState>,
    params: Result<Query<DeleteGroupQuery>, QueryRejection>,
) -> ApiResult {
    let params = query(params)?;
    let removed = state.service.delete_group(&name, params.cascade).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "removed": removed
    })))
}
