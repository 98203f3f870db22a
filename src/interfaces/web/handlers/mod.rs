pub mod commands;
pub mod groups;
pub mod jobs;
pub mod system;

use axum::{
    Json,
    extract::{
        Query,
        rejection::{JsonRejection, QueryRejection},
    },
};
use serde::Deserialize;

use crate::core::error::{DaemonError, DaemonResult};

pub(crate) type ApiResult = DaemonResult<Json<serde_json::Value>>;

/// Malformed bodies get the same error envelope as every other validation
/// failure.
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> DaemonResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| DaemonError::Validation(e.body_text()))
}

pub(crate) fn query<T>(params: Result<Query<T>, QueryRejection>) -> DaemonResult<T> {
    params
        .map(|Query(v)| v)
        .map_err(|e| DaemonError::Validation(e.body_text()))
}

/// `?group=` qualifier accepted by every command route.
#[derive(Debug, Default, Deserialize)]
pub struct GroupQuery {
    pub group: Option<String>,
}

impl GroupQuery {
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
    pub group: Option<String>,
}

pub(crate) const DEFAULT_HISTORY_LIMIT: usize = 20;
pub(crate) const DEFAULT_TOP_K: usize = 5;
