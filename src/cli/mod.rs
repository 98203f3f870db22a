mod client;
mod commands;
mod daemon;
mod groups;
mod jobs;

use anyhow::{Result, anyhow, bail};
use console::style;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::core::config::{DEFAULT_HOST, DEFAULT_PORT, DaemonConfig};
use crate::core::terminal::{self, GuideSection, print_error};
use crate::platform::{NativePlatform, Platform};
use client::ApiClient;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Commands")
        .command("add <name>", "Store a new command (--code or --file)")
        .command("edit <key>", "Change a stored command")
        .command("delete <key>", "Deactivate a command (--hard removes it)")
        .command("exec <key> [-- args]", "Run a stored command")
        .command("list", "List commands (--group, --lang, --all)")
        .command("show <key>", "Show a command and its recent runs")
        .command("history <key>", "Show a command's execution history")
        .command("search <query>", "Find commands (--similar for ranking)")
        .command("similar <key>", "Commands that look like this one")
        .print();

    GuideSection::new("Groups")
        .command("groups", "Show the group tree")
        .command("group create <name>", "Create a group (--parent)")
        .command("group move <name>", "Re-parent a group (--parent, none for root)")
        .command("group delete <name>", "Delete a group (--cascade)")
        .print();

    GuideSection::new("Jobs")
        .command("job create <name>", "Schedule code or a stored command")
        .command("job list", "List jobs (--status)")
        .command("job status <name>", "Job details, last run and retry chain")
        .command("job run <name>", "Run a job now")
        .command("job history <name>", "Past runs of a job")
        .command("job pause|resume|disable|archive <name>", "Change job status")
        .command("job delete <name>", "Remove a job and its history")
        .print();

    GuideSection::new("Daemon")
        .command("daemon start", "Start the background daemon")
        .command("daemon stop", "Stop the background daemon")
        .command("daemon status", "Show daemon health")
        .command("daemon run", "Run the daemon in the foreground")
        .command("logs", "Follow real-time daemon logs")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("scriptd").green()
    );
}

/// Arguments after the subcommand: positionals, `--flag value` options,
/// bare `--switch`es, and everything after a literal `--`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CliArgs {
    pub positionals: Vec<String>,
    pub options: Vec<(String, String)>,
    pub switches: Vec<String>,
    pub trailing: Vec<String>,
}

impl CliArgs {
    /// `value_flags` lists the flags that consume the next argument; any
    /// other `--name` is a switch. `--api-url` always takes a value.
    pub fn parse(args: &[String], start: usize, value_flags: &[&str]) -> Self {
        let mut parsed = CliArgs::default();
        let mut i = start;
        while i < args.len() {
            let arg = args[i].as_str();
            if arg == "--" {
                parsed.trailing = args[i + 1..].to_vec();
                break;
            }
            if arg == "--api-url" || value_flags.contains(&arg) {
                if i + 1 < args.len() {
                    parsed.options.push((arg.to_string(), args[i + 1].clone()));
                    i += 2;
                } else {
                    i += 1;
                }
            } else if arg.starts_with("--") || (arg.starts_with('-') && arg.len() == 2) {
                parsed.switches.push(arg.to_string());
                i += 1;
            } else {
                parsed.positionals.push(arg.to_string());
                i += 1;
            }
        }
        parsed
    }

    pub fn value(&self, flag: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|(k, _)| k == flag)
            .map(|(_, v)| v.as_str())
    }

    pub fn values(&self, flag: &str) -> Vec<String> {
        self.options
            .iter()
            .filter(|(k, _)| k == flag)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn has(&self, switch: &str) -> bool {
        self.switches.iter().any(|s| s == switch)
    }

    pub fn require(&self, idx: usize, what: &str) -> Result<&str> {
        self.positionals
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("missing {}", what))
    }

    pub fn number<T: FromStr>(&self, flag: &str) -> Result<Option<T>> {
        match self.value(flag) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| anyhow!("{} expects a number, got '{}'", flag, raw)),
            None => Ok(None),
        }
    }

    /// Repeated `--env KEY=VALUE` options.
    pub fn env(&self, flag: &str) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        for pair in self.values(flag) {
            let Some((key, value)) = pair.split_once('=') else {
                bail!("{} expects KEY=VALUE, got '{}'", flag, pair);
            };
            env.insert(key.to_string(), value.to_string());
        }
        Ok(env)
    }

    /// Tags from repeated `--tag` and comma-separated `--tags`.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = self.values("--tag");
        for list in self.values("--tags") {
            tags.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
            );
        }
        tags
    }
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(DEFAULT_PORT);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

/// `--api-url` wins; otherwise the configured host and port.
fn api_client(args: &[String], config: &DaemonConfig) -> Result<ApiClient> {
    let mut i = 2;
    while i < args.len() {
        if args[i] == "--api-url" && i + 1 < args.len() {
            return ApiClient::new(&args[i + 1]);
        }
        i += 1;
    }
    let host = if config.daemon.host == "0.0.0.0" {
        DEFAULT_HOST
    } else {
        config.daemon.host.as_str()
    };
    ApiClient::new(&format!("http://{}:{}", host, config.daemon.port))
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let data_dir = NativePlatform::data_dir();
    let run_dir = data_dir.join("run");
    let pid_file = run_dir.join("scriptd.pid");

    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };

    match cmd {
        "help" | "--help" | "-h" => {
            print_help();
            return Ok(());
        }
        "daemon" => {
            let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
            return match sub_cmd {
                "run" => daemon::daemon_run(&data_dir, &pid_file, &args).await,
                "start" => daemon::daemon_start(&data_dir, &run_dir, &pid_file, &args).await,
                "stop" => daemon::daemon_stop(&pid_file).await,
                "status" => {
                    let config = DaemonConfig::load(&data_dir).await?;
                    let client = api_client(&args, &config)?;
                    daemon::daemon_status(&client, &pid_file).await
                }
                _ => {
                    print_error("Unknown or missing daemon command. Expected: start, stop, status, run");
                    print_help();
                    Ok(())
                }
            };
        }
        "logs" => {
            return daemon::follow_logs(&run_dir, &pid_file).await;
        }
        _ => {}
    }

    let config = DaemonConfig::load(&data_dir).await?;
    let client = api_client(&args, &config)?;
    match cmd {
        "add" => commands::add(&client, &args).await,
        "edit" => commands::edit(&client, &args).await,
        "delete" | "rm" => commands::delete(&client, &args).await,
        "exec" | "run" => commands::exec(&client, &args).await,
        "list" | "ls" => commands::list(&client, &args).await,
        "show" => commands::show(&client, &args).await,
        "history" => commands::history(&client, &args).await,
        "search" => commands::search(&client, &args).await,
        "similar" => commands::similar(&client, &args).await,
        "groups" => groups::tree(&client).await,
        "group" => groups::run_group_command(&client, &args).await,
        "job" | "jobs" => jobs::run_job_command(&client, &args).await,
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_api_server_flags_reads_host_and_port() {
        let args = argv(&[
            "scriptd",
            "daemon",
            "run",
            "--api-host",
            "0.0.0.0",
            "--api-port",
            "19000",
        ]);
        let (host, port) = parse_api_server_flags(&args, 3, "127.0.0.1".to_string(), 17990);
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 19000);
    }

    #[test]
    fn bad_port_falls_back_to_default() {
        let args = argv(&["scriptd", "daemon", "run", "--api-port", "nope"]);
        let (_, port) = parse_api_server_flags(&args, 3, "127.0.0.1".to_string(), 18000);
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn cli_args_split_positionals_options_and_trailing() {
        let args = argv(&[
            "scriptd", "exec", "greet", "--group", "tools", "--env", "A=1", "--env", "B=x=y",
            "--verbose", "--", "--not-a-flag", "two",
        ]);
        let parsed = CliArgs::parse(&args, 2, &["--group", "--env"]);
        assert_eq!(parsed.positionals, vec!["greet"]);
        assert_eq!(parsed.value("--group"), Some("tools"));
        assert!(parsed.has("--verbose"));
        assert_eq!(parsed.trailing, vec!["--not-a-flag", "two"]);

        let env = parsed.env("--env").unwrap();
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "x=y");
    }

    #[test]
    fn env_without_equals_is_an_error() {
        let args = argv(&["scriptd", "exec", "x", "--env", "BROKEN"]);
        let parsed = CliArgs::parse(&args, 2, &["--env"]);
        assert!(parsed.env("--env").is_err());
    }

    #[test]
    fn numbers_and_tags() {
        let args = argv(&[
            "scriptd", "add", "x", "--timeout", "12", "--tag", "a", "--tags", "b, c,",
        ]);
        let parsed = CliArgs::parse(&args, 2, &["--timeout", "--tag", "--tags"]);
        assert_eq!(parsed.number::<u64>("--timeout").unwrap(), Some(12));
        assert_eq!(parsed.number::<u64>("--missing").unwrap(), None);
        assert_eq!(parsed.tags(), vec!["a", "b", "c"]);

        let args = argv(&["scriptd", "add", "x", "--timeout", "soon"]);
        let parsed = CliArgs::parse(&args, 2, &["--timeout"]);
        assert!(parsed.number::<u64>("--timeout").is_err());
    }
}
