use anyhow::{Result, bail};
use console::style;
use reqwest::Method;
use serde_json::{Value, json};

use super::CliArgs;
use super::client::ApiClient;
use crate::core::terminal::{GuideSection, print_error, print_info, print_success, print_warn, styled_status};

const JOB_FLAGS: &[&str] = &[
    "--code",
    "--command",
    "--group",
    "--lang",
    "--cron",
    "--every",
    "--timeout",
    "--retries",
    "--retry-delay",
    "--env",
    "--dir",
    "--type",
    "--priority",
    "--max-memory",
    "--max-cpu",
    "--desc",
    "--tag",
    "--tags",
    "--status",
    "--limit",
];

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

fn trigger_text(job: &Value) -> String {
    if let Some(cron) = job["cron_expression"].as_str() {
        format!("cron {}", cron)
    } else if let Some(every) = job["interval_seconds"].as_i64() {
        format!("every {}s", every)
    } else {
        "on demand".to_string()
    }
}

fn run_line(run: &Value) -> String {
    let mut line = format!(
        "{} {} retry={}",
        style(str_field(run, "execution_id")).dim(),
        styled_status(str_field(run, "status")),
        run["retry_count"].as_i64().unwrap_or(0)
    );
    if let Some(code) = run["exit_code"].as_i64() {
        line.push_str(&format!(" exit={}", code));
    }
    if let Some(ms) = run["duration_ms"].as_i64() {
        line.push_str(&format!(" {} ms", ms));
    }
    if let Some(kind) = run["error_type"].as_str() {
        line.push_str(&format!(" {}", style(kind).red()));
    }
    line
}

pub(crate) fn build_create_body(args: &CliArgs) -> Result<Value> {
    let name = args.require(0, "job name")?;
    let (command, kind) = match (args.value("--code"), args.value("--command")) {
        (Some(code), None) => (code, "inline"),
        (None, Some(stored)) => (stored, "stored"),
        _ => bail!("job create needs exactly one of --code <text> or --command <stored name>"),
    };
    Ok(json!({
        "job_name": name,
        "command": command,
        "command_kind": kind,
        "command_group": args.value("--group"),
        "language": args.value("--lang"),
        "job_type": args.value("--type"),
        "description": args.value("--desc").unwrap_or(""),
        "cron_expression": args.value("--cron"),
        "interval_seconds": args.number::<i64>("--every")?,
        "environment": args.env("--env")?,
        "working_directory": args.value("--dir"),
        "max_memory_mb": args.number::<i64>("--max-memory")?,
        "max_cpu_percent": args.number::<f64>("--max-cpu")?,
        "timeout_seconds": args.number::<i64>("--timeout")?,
        "max_retries": args.number::<i64>("--retries")?,
        "retry_delay_seconds": args.number::<i64>("--retry-delay")?,
        "tags": args.tags(),
        "priority": args.number::<i64>("--priority")?.unwrap_or(0),
    }))
}

pub async fn run_job_command(client: &ApiClient, argv: &[String]) -> Result<()> {
    let sub_cmd = argv.get(2).map(String::as_str).unwrap_or("");
    let args = CliArgs::parse(argv, 3, JOB_FLAGS);

    match sub_cmd {
        "create" | "add" => {
            let body = client.post(&["api", "jobs"], build_create_body(&args)?).await?;
            for w in body["warnings"].as_array().into_iter().flatten() {
                print_warn(w.as_str().unwrap_or_default());
            }
            let job = &body["job"];
            print_success(&format!(
                "Created job '{}' ({}), next run {}",
                str_field(job, "job_name"),
                trigger_text(job),
                job["next_run"].as_str().unwrap_or("on demand")
            ));
        }
        "list" | "ls" => {
            let query = args
                .value("--status")
                .map(|s| vec![("status", s.to_string())])
                .unwrap_or_default();
            let body = client.get(&["api", "jobs"], &query).await?;
            let jobs = body["jobs"].as_array().cloned().unwrap_or_default();
            if jobs.is_empty() {
                print_info("No jobs scheduled.");
                return Ok(());
            }
            let mut section = GuideSection::new(&format!("Jobs ({})", jobs.len()));
            for job in &jobs {
                section = section.bullet(&format!(
                    "{} [{}] {} next={}",
                    style(str_field(job, "job_name")).white().bold(),
                    styled_status(str_field(job, "status")),
                    trigger_text(job),
                    job["next_run"].as_str().unwrap_or("-")
                ));
            }
            section.print();
            println!();
        }
        "status" | "show" => {
            let name = args.require(0, "job name")?;
            let body = client.get(&["api", "jobs", name], &[]).await?;
            let job = &body["job"];
            let mut section = GuideSection::new(&format!("Job {}", name))
                .status("Status", &styled_status(str_field(job, "status")))
                .status("Trigger", &trigger_text(job))
                .status("Command", &format!("{} ({})", str_field(job, "command"), str_field(job, "command_kind")))
                .status("Next run", job["next_run"].as_str().unwrap_or("-"))
                .status("Last run", job["last_run"].as_str().unwrap_or("-"))
                .status(
                    "Limits",
                    &format!(
                        "timeout {}s, retries {}, delay {}s",
                        job["timeout_seconds"].as_i64().unwrap_or(0),
                        job["max_retries"].as_i64().unwrap_or(0),
                        job["retry_delay_seconds"].as_i64().unwrap_or(0)
                    ),
                );
            match body["latest_execution"].as_object() {
                Some(_) => {
                    section = section.blank().text("Latest attempt chain:");
                    for run in body["retry_chain"].as_array().into_iter().flatten() {
                        section = section.bullet(&run_line(run));
                    }
                    if let Some(msg) = body["latest_execution"]["error_message"].as_str() {
                        section = section.warn(msg);
                    }
                }
                None => section = section.blank().text("Never run."),
            }
            section.print();
            println!();
        }
        "history" | "executions" => {
            let name = args.require(0, "job name")?;
            let query = match args.number::<usize>("--limit")? {
                Some(limit) => vec![("limit", limit.to_string())],
                None => vec![],
            };
            let body = client
                .get(&["api", "jobs", name, "executions"], &query)
                .await?;
            let runs = body["executions"].as_array().cloned().unwrap_or_default();
            let mut section = GuideSection::new(&format!("Executions of {}", name));
            if runs.is_empty() {
                section = section.text("No executions recorded.");
            }
            for run in &runs {
                section = section.bullet(&run_line(run));
            }
            section.print();
            println!();
        }
        "run" => {
            let name = args.require(0, "job name")?;
            let body = client.post(&["api", "jobs", name, "run"], json!({})).await?;
            print_success(&format!(
                "Queued {} for '{}'",
                str_field(&body["execution"], "execution_id"),
                name
            ));
        }
        "pause" | "resume" | "disable" | "archive" => {
            let name = args.require(0, "job name")?;
            let body = client.post(&["api", "jobs", name, sub_cmd], json!({})).await?;
            print_success(&format!(
                "Job '{}' is now {}",
                name,
                str_field(&body["job"], "status")
            ));
        }
        "delete" | "rm" => {
            let name = args.require(0, "job name")?;
            client
                .call(Method::DELETE, &["api", "jobs", name], &[], None)
                .await?;
            print_success(&format!("Deleted job '{}'", name));
        }
        _ => {
            print_error(
                "Unknown or missing job command. Expected: create, list, status, run, history, pause, resume, disable, archive, delete",
            );
            GuideSection::new("scriptd job create")
                .hint("scriptd job create nightly --code 'backup.sh' --cron '0 3 * * *'", "")
                .hint("scriptd job create poll --command check_api --every 60 --retries 3", "")
                .print();
            println!();
        }
    }
    Ok(())
}
