use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{commands, groups, jobs, system};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/api/daemon/status", get(system::daemon_status))
        .route("/api/daemon/stop", post(system::stop_daemon))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .route(
            "/api/commands",
            get(commands::list_commands).post(commands::add_command),
        )
        .route(
            "/api/commands/{key}",
            get(commands::show_command)
                .patch(commands::edit_command)
                .delete(commands::delete_command),
        )
        .route(
            "/api/commands/{key}/execute",
            post(commands::execute_command),
        )
        .route(
            "/api/commands/{key}/similar",
            get(commands::similar_commands),
        )
        .route(
            "/api/commands/{key}/executions",
            get(commands::command_executions),
        )
        .route("/api/search", get(commands::search_commands))
        .route(
            "/api/groups",
            get(groups::group_tree).post(groups::create_group),
        )
        .route(
            "/api/groups/{name}",
            axum::routing::patch(groups::move_group).delete(groups::delete_group),
        )
        .route("/api/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/api/jobs/{name}",
            get(jobs::job_status).delete(jobs::delete_job),
        )
        .route("/api/jobs/{name}/pause", post(jobs::pause_job))
        .route("/api/jobs/{name}/resume", post(jobs::resume_job))
        .route("/api/jobs/{name}/disable", post(jobs::disable_job))
        .route("/api/jobs/{name}/archive", post(jobs::archive_job))
        .route("/api/jobs/{name}/run", post(jobs::run_job))
        .route("/api/jobs/{name}/executions", get(jobs::job_executions))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::daemon::test_service;
    use axum::http::StatusCode;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    async fn test_state() -> AppState {
        let (log_tx, _) = tokio::sync::broadcast::channel(16);
        AppState {
            service: test_service().await,
            log_tx,
            stop: CancellationToken::new(),
            api_port: 17990,
        }
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
        (status, json)
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let app = build_api_router(test_state().await);
        let req = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn add_then_show_by_name() {
        let state = test_state().await;
        let (status, json) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/commands",
            Some(json!({"name": "hello", "code": "echo hi", "language": "shell"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["command"]["language"], "bash");

        let (status, json) =
            json_request(build_api_router(state), Method::GET, "/api/commands/hello", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["command"]["name"], "hello");
        assert_eq!(json["executions"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn duplicate_add_is_conflict() {
        let state = test_state().await;
        let req = json!({"name": "dup", "code": "echo 1"});
        json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/commands",
            Some(req.clone()),
        )
        .await;
        let (status, json) = json_request(
            build_api_router(state),
            Method::POST,
            "/api/commands",
            Some(req),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "duplicate_name");
    }

    #[tokio::test]
    async fn unknown_command_is_not_found() {
        let app = build_api_router(test_state().await);
        let (status, json) = json_request(app, Method::GET, "/api/commands/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn malformed_body_uses_error_envelope() {
        let app = build_api_router(test_state().await);
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/commands",
            Some(json!({"code": "echo missing name"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn invalid_language_filter_is_rejected() {
        let app = build_api_router(test_state().await);
        let (status, _) =
            json_request(app, Method::GET, "/api/commands?language=cobol", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn group_create_and_tree() {
        let state = test_state().await;
        for body in [
            json!({"name": "ops"}),
            json!({"name": "backups", "parent": "ops"}),
        ] {
            let (status, _) = json_request(
                build_api_router(state.clone()),
                Method::POST,
                "/api/groups",
                Some(body),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, json) =
            json_request(build_api_router(state), Method::GET, "/api/groups", None).await;
        let tree = json["groups"].as_array().unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0]["name"], "ops");
        assert_eq!(tree[0]["children"][0]["name"], "backups");
    }

    #[tokio::test]
    async fn job_create_status_and_pause() {
        let state = test_state().await;
        let (status, json) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/jobs",
            Some(json!({
                "job_name": "nightly",
                "command": "echo ok",
                "cron_expression": "0 3 * * *"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["job"]["status"], "active");

        let (status, json) = json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/jobs/nightly/pause",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["job"]["status"], "paused");

        let (_, json) =
            json_request(build_api_router(state), Method::GET, "/api/jobs/nightly", None).await;
        assert!(json["latest_execution"].is_null());
        assert_eq!(json["retry_chain"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn conflicting_triggers_are_rejected() {
        let app = build_api_router(test_state().await);
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/jobs",
            Some(json!({
                "job_name": "both",
                "command": "echo ok",
                "cron_expression": "* * * * *",
                "interval_seconds": 60
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn daemon_status_reports_counts() {
        let app = build_api_router(test_state().await);
        let (status, json) = json_request(app, Method::GET, "/api/daemon/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"]["commands"], 0);
        assert_eq!(json["status"]["active_executions"], 0);
    }

    #[tokio::test]
    async fn stop_request_cancels_the_stop_token() {
        let state = test_state().await;
        let stop = state.stop.clone();
        let (status, _) =
            json_request(build_api_router(state), Method::POST, "/api/daemon/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(stop.is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_returns_the_report() {
        let state = test_state().await;
        json_request(
            build_api_router(state.clone()),
            Method::POST,
            "/api/commands",
            Some(json!({"name": "greet", "code": "echo \"hi $1\"", "language": "bash"})),
        )
        .await;

        let (status, json) = json_request(
            build_api_router(state),
            Method::POST,
            "/api/commands/greet/execute",
            Some(json!({"args": ["there"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["execution"]["status"], "success");
        assert_eq!(json["execution"]["stdout"], "hi there\n");
    }
}
