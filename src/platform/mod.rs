use std::path::{Path, PathBuf};

/// One point-in-time reading of a child's resource usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    pub rss_mb: f64,
    /// User + system CPU time consumed so far, in clock ticks.
    pub cpu_ticks: u64,
}

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Put the child in its own process group so the whole tree can be
    /// signalled at once.
    fn isolate_process_group(cmd: &mut std::process::Command);

    /// Send a termination signal to the process identified by `pid`.
    fn kill_process(pid: &str) -> std::io::Result<std::process::Output>;

    /// Forcibly kill the process group led by `pid`.
    fn kill_process_tree(pid: u32) -> std::io::Result<std::process::Output>;

    /// Whether a process with this pid still exists.
    fn is_process_alive(pid: u32) -> bool;

    /// Resource usage of a running process, if the OS exposes it.
    fn sample_process(pid: u32) -> Option<ProcessSample>;

    /// Clock ticks per second used by `ProcessSample::cpu_ticks`.
    fn clock_ticks_per_sec() -> u64;

    /// Spawn a child that tails / follows a log file.
    fn tail_file(path: &Path) -> std::io::Result<std::process::Child>;

    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Mark a file as executable (0o755 on Unix, no-op on Windows).
    fn set_executable(path: &Path);

    /// `PATH` used when the daemon's own environment has none.
    fn sandboxed_path() -> String;

    /// Root data directory for scriptd.
    /// Unix: `~/.scriptd`, Windows: `%APPDATA%\scriptd`.
    fn data_dir() -> PathBuf;
}

/// `SCRIPTD_DATA_DIR` wins over the per-platform default.
pub(crate) fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var("SCRIPTD_DATA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
