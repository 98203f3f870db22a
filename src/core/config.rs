use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::core::executor::Language;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 17990;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,

    /// Interpreter overrides keyed by language name, e.g. `python = "python3.12"`.
    #[serde(default)]
    pub interpreters: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_commands: usize,

    #[serde(default = "default_tick")]
    pub scheduler_tick_secs: u64,

    /// Executions returned by `show`.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Bytes kept per captured stream.
    #[serde(default = "default_output_limit")]
    pub output_limit_bytes: usize,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_command_timeout() -> u64 {
    30
}
fn default_max_concurrent() -> usize {
    10
}
fn default_tick() -> u64 {
    5
}
fn default_history_limit() -> usize {
    10
}
fn default_output_limit() -> usize {
    1024 * 1024
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            command_timeout_secs: default_command_timeout(),
            max_concurrent_commands: default_max_concurrent(),
            scheduler_tick_secs: default_tick(),
            history_limit: default_history_limit(),
            output_limit_bytes: default_output_limit(),
        }
    }
}

impl DaemonConfig {
    /// Read `<data_dir>/config.toml`, then apply `SCRIPTD_*` environment
    /// overrides. A missing file means defaults.
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join("config.toml");
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path).await?;
            toml::from_str::<DaemonConfig>(&content)
                .with_context(|| format!("invalid config at {:?}", config_path))?
        } else {
            info!("No config.toml found, using defaults.");
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.clamp();

        info!(
            "Loaded daemon config: bind={}:{}, timeout={}s, slots={}, tick={}s",
            config.daemon.host,
            config.daemon.port,
            config.daemon.command_timeout_secs,
            config.daemon.max_concurrent_commands,
            config.daemon.scheduler_tick_secs
        );
        Ok(config)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("SCRIPTD_API_HOST").filter(|h| !h.trim().is_empty()) {
            self.daemon.host = host;
        }
        let parse = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring {}={:?}: not a number", key, raw);
                    None
                }
            }
        };
        if let Some(port) = parse("SCRIPTD_API_PORT").and_then(|p| u16::try_from(p).ok()) {
            self.daemon.port = port;
        }
        if let Some(timeout) = parse("SCRIPTD_COMMAND_TIMEOUT") {
            self.daemon.command_timeout_secs = timeout;
        }
        if let Some(tick) = parse("SCRIPTD_TICK_SECS") {
            self.daemon.scheduler_tick_secs = tick;
        }
    }

    fn clamp(&mut self) {
        let d = &mut self.daemon;
        d.command_timeout_secs = d.command_timeout_secs.max(1);
        d.max_concurrent_commands = d.max_concurrent_commands.max(1);
        d.scheduler_tick_secs = d.scheduler_tick_secs.max(1);
        d.history_limit = d.history_limit.max(1);
        d.output_limit_bytes = d.output_limit_bytes.max(1024);
    }

    /// Interpreter overrides with unknown language names dropped.
    pub fn interpreter_overrides(&self) -> HashMap<Language, String> {
        self.interpreters
            .iter()
            .filter_map(|(name, bin)| match name.parse::<Language>() {
                Ok(lang) => Some((lang, bin.clone())),
                Err(_) => {
                    warn!("Ignoring interpreter override for unknown language '{}'", name);
                    None
                }
            })
            .collect()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.daemon.host, self.daemon.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.daemon.host, "127.0.0.1");
        assert_eq!(config.daemon.port, 17990);
        assert_eq!(config.daemon.command_timeout_secs, 30);
        assert_eq!(config.daemon.max_concurrent_commands, 10);
        assert_eq!(config.daemon.scheduler_tick_secs, 5);
        assert_eq!(config.daemon.history_limit, 10);
        assert_eq!(config.daemon.output_limit_bytes, 1024 * 1024);
    }

    #[tokio::test]
    async fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.daemon.command_timeout_secs, 30);
    }

    #[tokio::test]
    async fn load_reads_sections() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
[daemon]
port = 18000
max_concurrent_commands = 2

[interpreters]
python = "python3.12"
cobol = "cobc"
"#,
        )
        .unwrap();
        let config = DaemonConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.daemon.max_concurrent_commands, 2);
        assert_eq!(config.daemon.scheduler_tick_secs, 5);

        let overrides = config.interpreter_overrides();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[&Language::Python], "python3.12");
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[daemon\nport = ").unwrap();
        assert!(DaemonConfig::load(dir.path()).await.is_err());
    }

    #[test]
    fn env_overrides_win_and_bad_values_are_ignored() {
        let mut config = DaemonConfig::default();
        config.apply_env_overrides(|key| match key {
            "SCRIPTD_API_HOST" => Some("0.0.0.0".into()),
            "SCRIPTD_API_PORT" => Some("not-a-port".into()),
            "SCRIPTD_COMMAND_TIMEOUT" => Some("5".into()),
            "SCRIPTD_TICK_SECS" => Some("1".into()),
            _ => None,
        });
        assert_eq!(config.daemon.host, "0.0.0.0");
        assert_eq!(config.daemon.port, DEFAULT_PORT);
        assert_eq!(config.daemon.command_timeout_secs, 5);
        assert_eq!(config.daemon.scheduler_tick_secs, 1);
        assert_eq!(config.bind_addr(), "0.0.0.0:17990");
    }
}
