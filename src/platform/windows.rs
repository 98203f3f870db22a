use std::path::{Path, PathBuf};

use super::{Platform, ProcessSample, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn isolate_process_group(_cmd: &mut std::process::Command) {}

    fn kill_process(pid: &str) -> std::io::Result<std::process::Output> {
        std::process::Command::new("taskkill")
            .args(["/PID", pid, "/F"])
            .output()
    }

    fn kill_process_tree(pid: u32) -> std::io::Result<std::process::Output> {
        std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output()
    }

    fn is_process_alive(pid: u32) -> bool {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn sample_process(_pid: u32) -> Option<ProcessSample> {
        None
    }

    // Never consulted; sample_process reports nothing here.
    fn clock_ticks_per_sec() -> u64 {
        100
    }

    fn tail_file(path: &Path) -> std::io::Result<std::process::Child> {
        std::process::Command::new("powershell")
            .args([
                "-NoProfile",
                "-Command",
                &format!("Get-Content -Path '{}' -Tail 200 -Wait", path.display()),
            ])
            .spawn()
    }

    fn restrict_dir_permissions(_path: &Path) {}

    fn restrict_file_permissions(_path: &Path) {}

    fn set_executable(_path: &Path) {}

    fn sandboxed_path() -> String {
        r"C:\Windows\System32;C:\Windows".to_string()
    }

    fn data_dir() -> PathBuf {
        resolve_data_dir(
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("scriptd"),
        )
    }
}
