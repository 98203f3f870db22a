#![allow(dead_code)]

use serde_json::{Value, json};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A `scriptd daemon run` child on a free port with its own data directory.
pub struct DaemonHarness {
    child: Child,
    pub api_port: u16,
    pub api_base: String,
    data_dir: tempfile::TempDir,
    trace_log: Arc<Mutex<Vec<String>>>,
}

impl DaemonHarness {
    pub async fn spawn() -> TestResult<Self> {
        let api_port = find_free_port()?;
        let data_dir = tempfile::Builder::new().prefix("scriptd-e2e-").tempdir()?;
        let daemon_log = data_dir.path().join(format!("daemon-{}.log", api_port));

        let bin = scriptd_binary_path()?;
        let log_file = std::fs::File::create(&daemon_log)?;
        let log_file_err = log_file.try_clone()?;

        let child = Command::new(bin)
            .arg("daemon")
            .arg("run")
            .arg("--api-host")
            .arg("127.0.0.1")
            .arg("--api-port")
            .arg(api_port.to_string())
            .env("SCRIPTD_DATA_DIR", data_dir.path())
            .env("SCRIPTD_TICK_SECS", "1")
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()?;

        let mut harness = Self {
            child,
            api_port,
            api_base: format!("http://127.0.0.1:{}", api_port),
            data_dir,
            trace_log: Arc::new(Mutex::new(Vec::new())),
        };

        harness.wait_until_ready().await?;
        Ok(harness)
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    async fn wait_until_ready(&mut self) -> TestResult<()> {
        for _ in 0..80 {
            if let Some(status) = self.child.try_wait()? {
                return Err(format!("scriptd daemon exited early with status: {}", status).into());
            }

            let res = reqwest::Client::new()
                .get(format!("{}/health", self.api_base))
                .timeout(Duration::from_millis(700))
                .send()
                .await;

            if let Ok(resp) = res
                && resp.status().is_success()
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Err("Timed out waiting for scriptd API readiness".into())
    }

    pub async fn add_command(&self, name: &str, code: &str, language: &str) -> TestResult<Value> {
        let out = self
            .request_json(
                reqwest::Method::POST,
                "/api/commands",
                Some(json!({ "name": name, "code": code, "language": language })),
            )
            .await?;
        ensure_success(&out, "add_command")?;
        Ok(out["command"].clone())
    }

    pub async fn execute(&self, key: &str, body: Value) -> TestResult<Value> {
        let out = self
            .request_json(
                reqwest::Method::POST,
                &format!("/api/commands/{}/execute", key),
                Some(body),
            )
            .await?;
        ensure_success(&out, "execute")?;
        Ok(out["execution"].clone())
    }

    pub async fn job_executions(&self, name: &str) -> TestResult<Vec<Value>> {
        let out = self
            .request_json(
                reqwest::Method::GET,
                &format!("/api/jobs/{}/executions?limit=50", name),
                None,
            )
            .await?;
        ensure_success(&out, "job_executions")?;
        Ok(out["executions"].as_array().cloned().unwrap_or_default())
    }

    pub fn persist_trace_file(&self, name: &str) -> TestResult<PathBuf> {
        let path = self.data_dir.path().join(format!("{}.trace.log", name));
        let lines = self.trace_log.lock().unwrap_or_else(|e| e.into_inner());
        std::fs::write(&path, lines.join("\n\n---\n\n"))?;
        Ok(path)
    }

    pub async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> TestResult<Value> {
        let url = format!("{}{}", self.api_base, path);
        let client = reqwest::Client::new();
        let mut req = client
            .request(method.clone(), &url)
            .timeout(Duration::from_secs(30));
        if let Some(payload) = body.clone() {
            req = req.json(&payload);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        let parsed = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| {
            json!({
                "success": false,
                "raw": text,
                "error": {"kind": "harness", "message": format!("non-json response status={}", status)}
            })
        });

        let mut traces = self.trace_log.lock().unwrap_or_else(|e| e.into_inner());
        traces.push(format!(
            "REQUEST {} {}\nBODY {}\nSTATUS {}\nRESPONSE {}",
            method,
            path,
            body.unwrap_or(Value::Null),
            status,
            parsed
        ));
        drop(traces);

        Ok(parsed)
    }

    /// Graceful stop over the API; returns once the process has exited.
    pub async fn stop(&mut self) -> TestResult<std::process::ExitStatus> {
        let out = self
            .request_json(reqwest::Method::POST, "/api/daemon/stop", None)
            .await?;
        ensure_success(&out, "stop")?;
        for _ in 0..100 {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err("daemon did not exit after stop".into())
    }
}

impl Drop for DaemonHarness {
    fn drop(&mut self) {
        let _ = self.persist_trace_file("daemon");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn find_free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn scriptd_binary_path() -> TestResult<PathBuf> {
    if let Some(path) = option_env!("CARGO_BIN_EXE_scriptd") {
        return Ok(PathBuf::from(path));
    }

    let candidate = PathBuf::from("target")
        .join("debug")
        .join(if cfg!(windows) { "scriptd.exe" } else { "scriptd" });
    if candidate.exists() {
        return Ok(candidate);
    }

    Err("Could not locate scriptd test binary path".into())
}

pub fn ensure_success(value: &Value, action: &str) -> TestResult<()> {
    if value.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(());
    }
    Err(format!("{} failed: {}", action, value).into())
}
