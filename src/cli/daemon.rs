use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

use super::client::ApiClient;
use super::parse_api_server_flags;
use crate::core::config::{DEFAULT_HOST, DEFAULT_PORT, DaemonConfig};
use crate::core::daemon::DaemonService;
use crate::core::lifecycle::LifecycleManager;
use crate::core::scheduler::SchedulerComponent;
use crate::core::terminal::{self, GuideSection, print_error, print_info, print_warn};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::platform::{NativePlatform, Platform};

fn read_pid(pid_file: &Path) -> Option<u32> {
    std::fs::read_to_string(pid_file)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Resolves on Ctrl+C, SIGTERM, or an API stop request.
async fn wait_for_stop(stop: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
        _ = stop.cancelled() => {}
    }
}

/// Foreground daemon: serve the API and run the scheduler until told to stop.
pub async fn daemon_run(data_dir: &Path, pid_file: &Path, args: &[String]) -> Result<()> {
    let log_tx = crate::logging::init_daemon_logging(Level::INFO);

    let mut config = DaemonConfig::load(data_dir).await?;
    let (api_host, api_port) =
        parse_api_server_flags(args, 3, config.daemon.host.clone(), config.daemon.port);
    config.daemon.host = api_host.clone();
    config.daemon.port = api_port;

    info!(data_dir = %data_dir.display(), "Starting scriptd {}", env!("CARGO_PKG_VERSION"));
    let service = Arc::new(
        DaemonService::open(config, data_dir)
            .await
            .context("cannot open the command store")?,
    );

    let stop = CancellationToken::new();
    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        service: service.clone(),
        log_tx,
        stop: stop.clone(),
        api_host,
        api_port,
    }))));
    lifecycle.attach(Arc::new(Mutex::new(SchedulerComponent::new(
        service.scheduler().clone(),
    ))));
    lifecycle.start().await?;

    wait_for_stop(stop).await;

    service.shutdown().await?;
    lifecycle.shutdown().await?;

    // Only remove the PID file if it is ours.
    if read_pid(pid_file) == Some(std::process::id()) {
        std::fs::remove_file(pid_file).ok();
    }
    info!("scriptd stopped");
    terminal::print_goodbye();
    Ok(())
}

pub async fn daemon_start(
    data_dir: &Path,
    run_dir: &Path,
    pid_file: &Path,
    args: &[String],
) -> Result<()> {
    std::fs::create_dir_all(run_dir)?;
    NativePlatform::restrict_dir_permissions(run_dir);
    if let Some(pid) = read_pid(pid_file) {
        if NativePlatform::is_process_alive(pid) {
            print_warn("Daemon is already running. Use 'scriptd daemon stop' first.");
            return Ok(());
        }
        print_info(&format!("Removing stale PID file (PID {} is gone)", pid));
        std::fs::remove_file(pid_file).ok();
    }

    let config = DaemonConfig::load(data_dir).await?;
    let (api_host, api_port) =
        parse_api_server_flags(args, 3, config.daemon.host.clone(), config.daemon.port);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(run_dir.join("scriptd.log"))?;

    let exe = std::env::current_exe()?;
    let mut child_cmd = std::process::Command::new(exe);
    child_cmd.arg("daemon").arg("run");
    if api_port != DEFAULT_PORT {
        child_cmd.arg("--api-port").arg(api_port.to_string());
    }
    if api_host != DEFAULT_HOST {
        child_cmd.arg("--api-host").arg(&api_host);
    }

    let child = child_cmd
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    std::fs::write(pid_file, child.id().to_string())?;
    NativePlatform::restrict_file_permissions(pid_file);

    let client = ApiClient::new(&format!("http://{}:{}", api_host, api_port))?;
    let mut healthy = false;
    for _ in 0..50 {
        if client.get(&["health"], &[]).await.is_ok() {
            healthy = true;
            break;
        }
        if !NativePlatform::is_process_alive(child.id()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if !healthy {
        std::fs::remove_file(pid_file).ok();
        anyhow::bail!(
            "daemon did not come up; see {}",
            run_dir.join("scriptd.log").display()
        );
    }

    GuideSection::new("Daemon Started")
        .status(
            "Status",
            &format!(
                "{} (PID {})",
                style("RUNNING").green().bold(),
                style(child.id()).dim()
            ),
        )
        .status("API Endpoint", &format!("http://{}:{}", api_host, api_port))
        .blank()
        .info(&format!(
            "Run {} to follow the log.",
            style("scriptd logs").cyan().bold()
        ))
        .print();
    println!();

    Ok(())
}

pub async fn daemon_stop(pid_file: &Path) -> Result<()> {
    let Some(pid) = read_pid(pid_file) else {
        print_info("Daemon is not currently running.");
        return Ok(());
    };

    if NativePlatform::is_process_alive(pid) {
        let _ = NativePlatform::kill_process(&pid.to_string());
        for _ in 0..100 {
            if !NativePlatform::is_process_alive(pid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if NativePlatform::is_process_alive(pid) {
            print_warn(&format!("PID {} is still shutting down", pid));
        }
    }
    std::fs::remove_file(pid_file).ok();

    GuideSection::new("Daemon Stopped")
        .status(
            "Status",
            &format!(
                "{} (was PID {})",
                style("STOPPED").red().bold(),
                style(pid).dim()
            ),
        )
        .print();
    println!();
    Ok(())
}

/// Ask the daemon itself; fall back to the PID file when it does not answer.
pub async fn daemon_status(client: &ApiClient, pid_file: &Path) -> Result<()> {
    match client.get(&["api", "daemon", "status"], &[]).await {
        Ok(body) => {
            let s = &body["status"];
            GuideSection::new("Daemon Status")
                .status(
                    "Daemon",
                    &format!(
                        "{} (PID {})",
                        style("RUNNING").green().bold(),
                        style(s["pid"].as_u64().unwrap_or(0)).dim()
                    ),
                )
                .status("Version", s["version"].as_str().unwrap_or("?"))
                .status("Listening", &format!("http://{}", s["bind"].as_str().unwrap_or("?")))
                .status("Data dir", s["data_dir"].as_str().unwrap_or("?"))
                .status(
                    "Uptime",
                    &format!("{}s", s["uptime_secs"].as_i64().unwrap_or(0)),
                )
                .status(
                    "Executing",
                    &format!(
                        "{} command(s), {} job run(s)",
                        s["active_executions"].as_u64().unwrap_or(0),
                        s["running_jobs"].as_i64().unwrap_or(0)
                    ),
                )
                .status(
                    "Stored",
                    &format!(
                        "{} command(s), {} job(s)",
                        s["commands"].as_i64().unwrap_or(0),
                        s["jobs"].as_i64().unwrap_or(0)
                    ),
                )
                .print();
        }
        Err(e) => match read_pid(pid_file) {
            Some(pid) if NativePlatform::is_process_alive(pid) => {
                GuideSection::new("Daemon Status")
                    .status(
                        "Daemon",
                        &format!(
                            "{} (PID {})",
                            style("NOT RESPONDING").yellow().bold(),
                            style(pid).dim()
                        ),
                    )
                    .warn(&e.to_string())
                    .print();
            }
            _ => {
                GuideSection::new("Daemon Status")
                    .status("Daemon", &style("STOPPED").red().bold().to_string())
                    .blank()
                    .info(&format!(
                        "Run {} to start the daemon.",
                        style("scriptd daemon start").cyan().bold()
                    ))
                    .print();
            }
        },
    }
    println!();
    Ok(())
}

pub async fn follow_logs(run_dir: &Path, pid_file: &Path) -> Result<()> {
    let log_file = run_dir.join("scriptd.log");
    if read_pid(pid_file).is_none() {
        GuideSection::new("Live Logs")
            .warn("Daemon is not running.")
            .blank()
            .info(&format!(
                "Run {} to start it.",
                style("scriptd daemon start").cyan().bold()
            ))
            .print();
        println!();
        return Ok(());
    }
    if !log_file.exists() {
        print_error(&format!(
            "Log file not found at {}",
            style(log_file.display()).dim()
        ));
        return Ok(());
    }

    GuideSection::new("Live Logs")
        .text(&format!(
            "Following {} - press {} to stop.",
            style("scriptd.log").cyan(),
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    println!();
    let mut child = NativePlatform::tail_file(&log_file)?;
    let _ = child.wait()?;
    Ok(())
}
