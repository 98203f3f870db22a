use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::{Platform, ProcessSample, resolve_data_dir};

const FALLBACK_CLOCK_TICKS: u64 = 100;

fn parse_clock_ticks(raw: &str) -> Option<u64> {
    raw.trim().parse().ok().filter(|&t| t > 0)
}

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn isolate_process_group(cmd: &mut std::process::Command) {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    fn kill_process(pid: &str) -> std::io::Result<std::process::Output> {
        std::process::Command::new("kill")
            .arg("-15")
            .arg(pid)
            .output()
    }

    fn kill_process_tree(pid: u32) -> std::io::Result<std::process::Output> {
        // Negative pid addresses the process group.
        std::process::Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{}", pid))
            .output()
    }

    fn is_process_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn sample_process(pid: u32) -> Option<ProcessSample> {
        let proc_dir = PathBuf::from("/proc").join(pid.to_string());
        let stat = std::fs::read_to_string(proc_dir.join("stat")).ok()?;
        // comm may contain spaces, so fields are counted after the closing paren.
        let after_comm = &stat[stat.rfind(')')? + 1..];
        let fields: Vec<&str> = after_comm.split_whitespace().collect();
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;

        let status = std::fs::read_to_string(proc_dir.join("status")).ok()?;
        let rss_kb: u64 = status
            .lines()
            .find(|l| l.starts_with("VmRSS:"))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Some(ProcessSample {
            rss_mb: rss_kb as f64 / 1024.0,
            cpu_ticks: utime + stime,
        })
    }

    /// `CLK_TCK`, the unit of the utime/stime fields in `/proc/<pid>/stat`.
    /// Queried once via `getconf`; 100 when that fails, the Linux value on
    /// every mainstream architecture.
    fn clock_ticks_per_sec() -> u64 {
        static TICKS: OnceLock<u64> = OnceLock::new();
        *TICKS.get_or_init(|| {
            std::process::Command::new("getconf")
                .arg("CLK_TCK")
                .output()
                .ok()
                .filter(|out| out.status.success())
                .and_then(|out| parse_clock_ticks(&String::from_utf8_lossy(&out.stdout)))
                .unwrap_or(FALLBACK_CLOCK_TICKS)
        })
    }

    fn tail_file(path: &Path) -> std::io::Result<std::process::Child> {
        std::process::Command::new("tail")
            .arg("-n")
            .arg("200")
            .arg("-f")
            .arg(path)
            .spawn()
    }

    fn restrict_dir_permissions(path: &Path) {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }

    fn restrict_file_permissions(path: &Path) {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }

    fn set_executable(path: &Path) {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755));
    }

    fn sandboxed_path() -> String {
        "/usr/local/bin:/usr/bin:/bin".to_string()
    }

    fn data_dir() -> PathBuf {
        resolve_data_dir(
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".scriptd"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_process_reads_own_proc_entry() {
        if !Path::new("/proc/self/stat").exists() {
            return;
        }
        let sample = NativePlatform::sample_process(std::process::id())
            .expect("own process should be sampled");
        assert!(sample.rss_mb > 0.0);
    }

    #[test]
    fn clock_ticks_come_from_the_system() {
        let ticks = NativePlatform::clock_ticks_per_sec();
        assert!(ticks > 0);
        assert_eq!(ticks, NativePlatform::clock_ticks_per_sec());
        assert_eq!(parse_clock_ticks("250\n"), Some(250));
        assert_eq!(parse_clock_ticks("0"), None);
        assert_eq!(parse_clock_ticks("undefined"), None);
    }

    #[test]
    fn dead_pid_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!NativePlatform::is_process_alive(pid));
    }
}
