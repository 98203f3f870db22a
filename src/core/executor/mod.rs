//! Runs one piece of user code in a scratch directory under a hard deadline.
//!
//! Ordinary script failure is an outcome, not an error: a non-zero exit
//! becomes `ExecutionStatus::Error` and an expired deadline becomes
//! `ExecutionStatus::Timeout`. Only infrastructure faults (missing
//! interpreter, unusable working directory, filesystem errors) return `Err`.

mod language;

pub use language::{DISPATCH, Language, LanguageSpec};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::{DaemonError, DaemonResult};
use crate::core::store::ExecutionStatus;
use crate::platform::{NativePlatform, Platform};

/// Variables passed through from the daemon's own environment.
const INHERITED_ENV: &[&str] = &["PATH", "HOME", "USER", "LANG", "LC_ALL", "TERM", "TMPDIR"];

const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Slack past the deadline for pipes to report EOF after a kill.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Exposed to the script as `SCRIPTD_COMMAND`.
    pub name: String,
    pub code: String,
    pub language: Language,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Defaults to the scratch directory holding the script.
    pub working_directory: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: i64,
    pub pid: Option<u32>,
    pub max_memory_mb: Option<f64>,
    pub avg_cpu_percent: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Telemetry {
    peak_rss_mb: Option<f64>,
    avg_cpu_percent: Option<f64>,
}

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    interpreters: HashMap<Language, String>,
    output_limit: usize,
}

impl ExecutionEngine {
    pub fn new(interpreters: HashMap<Language, String>, output_limit: usize) -> Self {
        Self {
            interpreters,
            output_limit,
        }
    }

    /// Binary used for a language: the configured override, else the
    /// dispatch table default.
    pub fn interpreter_for(&self, language: Language) -> &str {
        self.interpreters
            .get(&language)
            .map(String::as_str)
            .unwrap_or(language.spec().interpreter)
    }

    /// Run to completion, deadline or cancellation. The child's pid is sent
    /// through `pid_tx` as soon as it is known. The scratch directory is
    /// removed on every return path when the `TempDir` guard drops.
    pub async fn run(
        &self,
        req: &ExecutionRequest,
        cancel: &CancellationToken,
        pid_tx: Option<oneshot::Sender<u32>>,
    ) -> DaemonResult<ExecutionOutcome> {
        let spec = req.language.spec();
        let scratch = tempfile::Builder::new().prefix("scriptd-").tempdir()?;
        let script = scratch.path().join(format!("script.{}", spec.extension));
        tokio::fs::write(&script, &req.code).await?;
        if spec.executable {
            NativePlatform::set_executable(&script);
        }

        let cwd = req
            .working_directory
            .clone()
            .unwrap_or_else(|| scratch.path().to_path_buf());
        if !cwd.is_dir() {
            return Err(DaemonError::Infrastructure(format!(
                "working directory {} does not exist",
                cwd.display()
            )));
        }

        let interpreter = self.interpreter_for(req.language);
        let mut std_cmd = std::process::Command::new(interpreter);
        std_cmd
            .arg(&script)
            .args(&req.args)
            .current_dir(&cwd)
            .env_clear()
            .envs(inherited_env())
            .envs(&req.env)
            .env("SCRIPTD_COMMAND", &req.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        NativePlatform::isolate_process_group(&mut std_cmd);
        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DaemonError::Infrastructure(format!("interpreter '{}' not found", interpreter))
            } else {
                DaemonError::Infrastructure(format!("failed to spawn {}: {}", interpreter, e))
            }
        })?;
        let pid = child.id();
        debug!(command = %req.name, ?pid, interpreter, "Child spawned");
        if let (Some(tx), Some(pid)) = (pid_tx, pid) {
            let _ = tx.send(pid);
        }

        let limit = self.output_limit;
        let drain = CancellationToken::new();
        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), limit, drain.clone()));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), limit, drain.clone()));
        let sampling = CancellationToken::new();
        let sampler = pid.map(|p| tokio::spawn(sample_until(p, started, sampling.clone())));

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            _ = tokio::time::sleep(req.timeout) => Ending::TimedOut,
            _ = cancel.cancelled() => Ending::Cancelled,
        };

        sampling.cancel();
        // Leftover members of the group (background jobs, or everything on
        // timeout) must not outlive the call.
        if let Some(pid) = pid {
            let _ = NativePlatform::kill_process_tree(pid);
        }
        let (mut status, mut exit_code) = match ending {
            Ending::Exited(Ok(exit)) => {
                let status = if exit.success() {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Error
                };
                (status, exit.code())
            }
            Ending::Exited(Err(e)) => {
                return Err(DaemonError::Infrastructure(format!(
                    "failed waiting for child: {}",
                    e
                )));
            }
            Ending::TimedOut => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                (ExecutionStatus::Timeout, None)
            }
            Ending::Cancelled => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                (ExecutionStatus::Killed, None)
            }
        };

        // A process that escaped the group (setsid, daemonizing tools) can
        // hold the pipes open; the deadline covers draining them too.
        let collect = async {
            (
                stdout_task.await.unwrap_or_default(),
                stderr_task.await.unwrap_or_default(),
            )
        };
        tokio::pin!(collect);
        let drain_budget = req.timeout.saturating_sub(started.elapsed()) + DRAIN_GRACE;
        let mut drain_overrun = false;
        let (stdout, stderr) = tokio::select! {
            biased;
            out = &mut collect => out,
            _ = tokio::time::sleep(drain_budget) => {
                drain_overrun = true;
                drain.cancel();
                (&mut collect).await
            }
            _ = cancel.cancelled() => {
                drain.cancel();
                (&mut collect).await
            }
        };
        if drain_overrun {
            warn!(
                command = %req.name,
                "Output pipes still open at the deadline; a detached process kept them"
            );
        }

        let elapsed = started.elapsed();
        if matches!(status, ExecutionStatus::Success | ExecutionStatus::Error)
            && (drain_overrun || elapsed > req.timeout)
        {
            status = ExecutionStatus::Timeout;
            exit_code = None;
        }
        let telemetry = match sampler {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Telemetry::default(),
        };

        let outcome = ExecutionOutcome {
            status,
            stdout,
            stderr,
            exit_code,
            duration_ms: elapsed.as_millis() as i64,
            pid,
            max_memory_mb: telemetry.peak_rss_mb,
            avg_cpu_percent: telemetry.avg_cpu_percent,
        };
        info!(
            command = %req.name,
            language = %req.language,
            status = %outcome.status,
            exit_code = ?outcome.exit_code,
            duration_ms = outcome.duration_ms,
            "Execution finished"
        );
        Ok(outcome)
    }
}

fn inherited_env() -> Vec<(String, String)> {
    let mut vars: Vec<(String, String)> = INHERITED_ENV
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
        .collect();
    if !vars.iter().any(|(k, _)| k == "PATH") {
        vars.push(("PATH".to_string(), NativePlatform::sandboxed_path()));
    }
    vars
}

/// Drain a pipe to EOF, keeping at most `limit` bytes. Reading past the
/// limit keeps the child from blocking on a full pipe.
/// Stops early, keeping what was read, once `stop` fires.
async fn read_capped<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    limit: usize,
    stop: CancellationToken,
) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut buf = [0u8; 8192];
    loop {
        let read = tokio::select! {
            biased;
            read = pipe.read(&mut buf) => read,
            _ = stop.cancelled() => break,
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                let take = room.min(n);
                kept.extend_from_slice(&buf[..take]);
                dropped += n - take;
            }
            Err(e) => {
                warn!("Pipe read failed: {}", e);
                break;
            }
        }
    }
    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if dropped > 0 {
        text.push_str(&format!("\n[output truncated: {} bytes dropped]", dropped));
    }
    text
}

async fn sample_until(pid: u32, started: Instant, stop: CancellationToken) -> Telemetry {
    let mut telemetry = Telemetry::default();
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(sample) = NativePlatform::sample_process(pid) else {
            continue;
        };
        telemetry.peak_rss_mb = Some(
            telemetry
                .peak_rss_mb
                .map_or(sample.rss_mb, |peak| peak.max(sample.rss_mb)),
        );
        let wall = started.elapsed().as_secs_f64();
        if wall > 0.0 {
            let cpu_secs = sample.cpu_ticks as f64 / NativePlatform::clock_ticks_per_sec() as f64;
            telemetry.avg_cpu_percent = Some(cpu_secs / wall * 100.0);
        }
    }
    telemetry
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(HashMap::new(), 1024 * 1024)
    }

    fn shell(code: &str, timeout_secs: u64) -> ExecutionRequest {
        ExecutionRequest {
            name: "test".into(),
            code: code.into(),
            language: Language::Bash,
            args: vec![],
            env: BTreeMap::new(),
            working_directory: None,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[tokio::test]
    async fn echo_succeeds() {
        let out = engine()
            .run(&shell("echo \"hi\"", 10), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(out.status, ExecutionStatus::Success);
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error_outcome() {
        let out = engine()
            .run(&shell("echo oops >&2; exit 3", 10), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(out.status, ExecutionStatus::Error);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr, "oops\n");
    }

    #[tokio::test]
    async fn deadline_kills_the_process_group() {
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();
        let out = engine()
            .run(&shell("sleep 10", 1), &CancellationToken::new(), Some(tx))
            .await
            .unwrap();
        assert_eq!(out.status, ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid = rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!NativePlatform::is_process_alive(pid));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn detached_process_holding_stdout_cannot_outlast_the_deadline() {
        let started = Instant::now();
        let out = engine()
            .run(
                &shell("setsid sleep 8 &\necho started", 2),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        let wall = started.elapsed();
        assert!(wall < Duration::from_secs(4), "returned after {:?}", wall);
        assert_eq!(out.status, ExecutionStatus::Timeout);
        assert_eq!(out.stdout, "started\n");
        assert!(out.duration_ms >= 2000);
    }

    #[tokio::test]
    async fn cancellation_reports_killed() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let out = engine().run(&shell("sleep 10", 30), &cancel, None).await.unwrap();
        assert_eq!(out.status, ExecutionStatus::Killed);
    }

    #[tokio::test]
    async fn args_and_env_reach_the_script() {
        let mut req = shell("echo \"$1-$2 $GREETING $SCRIPTD_COMMAND\"", 10);
        req.args = vec!["a".into(), "b".into()];
        req.env.insert("GREETING".into(), "hello".into());
        let out = engine().run(&req, &CancellationToken::new(), None).await.unwrap();
        assert_eq!(out.stdout, "a-b hello test\n");
    }

    #[tokio::test]
    async fn daemon_environment_does_not_leak() {
        // SAFETY: test-only mutation of a variable nothing else reads.
        unsafe { std::env::set_var("SCRIPTD_TEST_SECRET", "leaked") };
        let out = engine()
            .run(
                &shell("echo \"[${SCRIPTD_TEST_SECRET}]\"", 10),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "[]\n");
    }

    #[tokio::test]
    async fn scratch_directory_is_removed() {
        for code in ["pwd", "pwd; exit 1", "pwd; sleep 5"] {
            let out = engine()
                .run(&shell(code, 1), &CancellationToken::new(), None)
                .await
                .unwrap();
            let dir = out.stdout.trim();
            assert!(!dir.is_empty());
            assert!(!std::path::Path::new(dir).exists(), "{} left behind", dir);
        }
    }

    #[tokio::test]
    async fn missing_interpreter_is_infrastructure() {
        let engine = ExecutionEngine::new(
            HashMap::from([(Language::Python, "scriptd-no-such-python".to_string())]),
            1024,
        );
        let mut req = shell("print('x')", 5);
        req.language = Language::Python;
        let err = engine
            .run(&req, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Infrastructure(_)));
    }

    #[tokio::test]
    async fn output_is_truncated_to_limit() {
        let engine = ExecutionEngine::new(HashMap::new(), 16);
        let out = engine
            .run(
                &shell("head -c 100 /dev/zero | tr '\\0' 'x'", 10),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert!(out.stdout.starts_with(&"x".repeat(16)));
        assert!(out.stdout.contains("84 bytes dropped"));
    }

    #[tokio::test]
    async fn missing_working_directory_fails_before_spawn() {
        let mut req = shell("true", 5);
        req.working_directory = Some(PathBuf::from("/definitely/not/here"));
        assert!(matches!(
            engine().run(&req, &CancellationToken::new(), None).await,
            Err(DaemonError::Infrastructure(_))
        ));
    }
}
