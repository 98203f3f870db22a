//! Domain errors surfaced to clients as structured responses.
//!
//! Script failures and timeouts are not errors: they are terminal statuses on
//! the execution record. Only malformed requests, unknown entities, name
//! collisions and infrastructure faults travel through this type.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} '{name}' already exists{scope}")]
    DuplicateName {
        kind: &'static str,
        name: String,
        scope: String,
    },

    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type DaemonResult<T> = std::result::Result<T, DaemonError>;

impl DaemonError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn duplicate(kind: &'static str, name: impl Into<String>, group: Option<&str>) -> Self {
        Self::DuplicateName {
            kind,
            name: name.into(),
            scope: group
                .map(|g| format!(" in group '{}'", g))
                .unwrap_or_default(),
        }
    }

    /// Stable machine-readable tag carried in the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateName { .. } => "duplicate_name",
            Self::Infrastructure(_) => "infrastructure",
            Self::Store(_) => "store",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::DuplicateName { .. } => StatusCode::CONFLICT,
            Self::Infrastructure(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(e: std::io::Error) -> Self {
        Self::Infrastructure(e.to_string())
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        Self::Infrastructure(format!("corrupt json column: {}", e))
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{}", self);
        }
        let body = serde_json::json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
