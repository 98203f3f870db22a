#![cfg(unix)]

mod e2e_harness;

use e2e_harness::{DaemonHarness, TestResult, ensure_success};
use serde_json::json;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hello_runs_and_is_recorded() -> TestResult<()> {
    let daemon = DaemonHarness::spawn().await?;
    let cmd = daemon.add_command("hello", "echo \"hi\"", "shell").await?;
    assert_eq!(cmd["language"], "bash");

    let id = cmd["id"].as_str().ok_or("missing id")?;
    let run = daemon.execute(id, json!({ "args": [] })).await?;
    assert_eq!(run["status"], "success");
    assert_eq!(run["stdout"], "hi\n");
    assert_eq!(run["exit_code"], 0);

    let shown = daemon
        .request_json(reqwest::Method::GET, "/api/commands/hello", None)
        .await?;
    ensure_success(&shown, "show")?;
    assert_eq!(shown["command"]["execution_count"], 1);
    assert_eq!(shown["executions"][0]["status"], "success");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sleeper_times_out_and_leaves_nothing_running() -> TestResult<()> {
    let daemon = DaemonHarness::spawn().await?;
    daemon
        .add_command("sleeper", "echo $$; sleep 10", "shell")
        .await?;

    let started = Instant::now();
    let run = daemon
        .execute("sleeper", json!({ "timeout_seconds": 1 }))
        .await?;
    assert_eq!(run["status"], "timeout");
    assert!(started.elapsed() < Duration::from_secs(5));

    let pid: i32 = run["stdout"]
        .as_str()
        .unwrap_or("")
        .trim()
        .parse()
        .map_err(|_| "script did not print its pid")?;
    let alive = std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stderr(std::process::Stdio::null())
        .status()?
        .success();
    assert!(!alive, "timed-out script {} is still running", pid);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_job_retries_twice_then_stops() -> TestResult<()> {
    let daemon = DaemonHarness::spawn().await?;
    let created = daemon
        .request_json(
            reqwest::Method::POST,
            "/api/jobs",
            Some(json!({
                "job_name": "flaky",
                "command": "exit 1",
                "language": "bash",
                "interval_seconds": 60,
                "max_retries": 2,
                "retry_delay_seconds": 1
            })),
        )
        .await?;
    ensure_success(&created, "create job")?;

    let queued = daemon
        .request_json(reqwest::Method::POST, "/api/jobs/flaky/run", None)
        .await?;
    ensure_success(&queued, "run job")?;

    let deadline = Instant::now() + Duration::from_secs(20);
    let runs = loop {
        let runs = daemon.job_executions("flaky").await?;
        let settled = runs.len() == 3 && runs.iter().all(|r| r["status"] == "failed");
        if settled || Instant::now() > deadline {
            break runs;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    };
    assert_eq!(runs.len(), 3, "runs: {:?}", runs);

    let mut counts: Vec<i64> = runs
        .iter()
        .filter_map(|r| r["retry_count"].as_i64())
        .collect();
    counts.sort();
    assert_eq!(counts, vec![0, 1, 2]);

    // No fourth attempt once retries are exhausted.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(daemon.job_executions("flaky").await?.len(), 3);

    let status = daemon
        .request_json(reqwest::Method::GET, "/api/jobs/flaky", None)
        .await?;
    assert_eq!(status["retry_chain"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn similarity_search_ranks_process_data_first() -> TestResult<()> {
    let daemon = DaemonHarness::spawn().await?;
    let corpus = [
        ("process_data", "Process CSV data with pandas"),
        ("backup_home", "Archive the home directory to a tarball"),
        ("check_disk", "Report free disk space on every mount"),
    ];
    for (name, description) in corpus {
        let out = daemon
            .request_json(
                reqwest::Method::POST,
                "/api/commands",
                Some(json!({
                    "name": name,
                    "code": "echo ok",
                    "language": "bash",
                    "description": description
                })),
            )
            .await?;
        ensure_success(&out, "add")?;
    }

    let out = daemon
        .request_json(
            reqwest::Method::GET,
            "/api/search?q=data%20processing&mode=similar&top_k=3",
            None,
        )
        .await?;
    ensure_success(&out, "search")?;
    assert_eq!(out["results"][0]["command"]["name"], "process_data");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_names_are_rejected_with_conflict() -> TestResult<()> {
    let daemon = DaemonHarness::spawn().await?;
    daemon.add_command("dup", "echo 1", "bash").await?;
    let again = daemon
        .request_json(
            reqwest::Method::POST,
            "/api/commands",
            Some(json!({ "name": "dup", "code": "echo 2", "language": "bash" })),
        )
        .await?;
    assert_eq!(again["success"], false);
    assert_eq!(again["error"]["kind"], "duplicate_name");

    let listed = daemon
        .request_json(reqwest::Method::GET, "/api/commands", None)
        .await?;
    assert_eq!(listed["commands"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_request_shuts_the_daemon_down() -> TestResult<()> {
    let mut daemon = DaemonHarness::spawn().await?;
    let status = daemon.stop().await?;
    assert!(status.success());
    assert!(daemon.data_dir().join("scriptd.db").exists());
    Ok(())
}
