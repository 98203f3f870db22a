use anyhow::{Context, Result, bail};
use console::style;
use reqwest::Method;
use serde_json::{Value, json};

use super::CliArgs;
use super::client::ApiClient;
use crate::core::terminal::{GuideSection, print_info, print_success, print_warn, styled_status};

const COMMAND_FLAGS: &[&str] = &[
    "--code", "--file", "--lang", "--group", "--tag", "--tags", "--desc", "--name", "--move-to",
];

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

fn print_warnings(body: &Value) {
    for w in body["warnings"].as_array().into_iter().flatten() {
        if let Some(w) = w.as_str() {
            print_warn(w);
        }
    }
}

/// `--code` wins over `--file`.
fn read_code(args: &CliArgs) -> Result<Option<String>> {
    if let Some(code) = args.value("--code") {
        return Ok(Some(code.to_string()));
    }
    match args.value("--file") {
        Some(path) => std::fs::read_to_string(path)
            .map(Some)
            .with_context(|| format!("cannot read {}", path)),
        None => Ok(None),
    }
}

fn group_query(args: &CliArgs) -> Vec<(&'static str, String)> {
    args.value("--group")
        .map(|g| vec![("group", g.to_string())])
        .unwrap_or_default()
}

fn command_line(cmd: &Value) -> String {
    let group = match str_field(cmd, "group") {
        "" => String::new(),
        g => format!(" {}", style(format!("[{}]", g)).magenta()),
    };
    let inactive = if cmd["is_active"].as_bool() == Some(false) {
        format!(" {}", style("(deleted)").dim())
    } else {
        String::new()
    };
    format!(
        "{}{} {} {}{}",
        style(str_field(cmd, "name")).white().bold(),
        group,
        style(str_field(cmd, "language")).cyan(),
        style(str_field(cmd, "description")).dim(),
        inactive
    )
}

pub async fn add(client: &ApiClient, argv: &[String]) -> Result<()> {
    let args = CliArgs::parse(argv, 2, COMMAND_FLAGS);
    let name = args.require(0, "command name")?;
    let Some(code) = read_code(&args)? else {
        bail!("add needs --code <text> or --file <path>");
    };

    let body = client
        .post(
            &["api", "commands"],
            json!({
                "name": name,
                "code": code,
                "language": args.value("--lang"),
                "group": args.value("--group"),
                "tags": args.tags(),
                "description": args.value("--desc").unwrap_or(""),
            }),
        )
        .await?;
    print_warnings(&body);
    let cmd = &body["command"];
    print_success(&format!(
        "Added '{}' ({}) as {}",
        str_field(cmd, "name"),
        style(str_field(cmd, "id")).dim(),
        str_field(cmd, "language")
    ));
    Ok(())
}

pub async fn edit(client: &ApiClient, argv: &[String]) -> Result<()> {
    let args = CliArgs::parse(argv, 2, COMMAND_FLAGS);
    let key = args.require(0, "command name or id")?;

    let mut patch = serde_json::Map::new();
    if let Some(name) = args.value("--name") {
        patch.insert("name".into(), json!(name));
    }
    if let Some(code) = read_code(&args)? {
        patch.insert("code".into(), json!(code));
    }
    if let Some(lang) = args.value("--lang") {
        patch.insert("language".into(), json!(lang));
    }
    if let Some(desc) = args.value("--desc") {
        patch.insert("description".into(), json!(desc));
    }
    if let Some(group) = args.value("--move-to") {
        patch.insert("group".into(), json!(group));
    }
    if args.has("--clear-tags") || !args.tags().is_empty() {
        patch.insert("tags".into(), json!(args.tags()));
    }

    let body = client
        .call(
            Method::PATCH,
            &["api", "commands", key],
            &group_query(&args),
            Some(Value::Object(patch)),
        )
        .await?;
    print_warnings(&body);
    print_success(&format!("Updated '{}'", str_field(&body["command"], "name")));
    Ok(())
}

pub async fn delete(client: &ApiClient, argv: &[String]) -> Result<()> {
    let args = CliArgs::parse(argv, 2, COMMAND_FLAGS);
    let key = args.require(0, "command name or id")?;
    let mut query = group_query(&args);
    if args.has("--hard") {
        query.push(("hard", "true".to_string()));
    }
    client
        .call(Method::DELETE, &["api", "commands", key], &query, None)
        .await?;
    if args.has("--hard") {
        print_success(&format!("Removed '{}' and its history", key));
    } else {
        print_success(&format!("Deactivated '{}'", key));
    }
    Ok(())
}

/// Prints the script's own output verbatim, then a status line. A script
/// that exits non-zero is still a successful CLI call.
pub async fn exec(client: &ApiClient, argv: &[String]) -> Result<()> {
    let args = CliArgs::parse(argv, 2, &["--group", "--env", "--timeout"]);
    let key = args.require(0, "command name or id")?;
    let body = client
        .call(
            Method::POST,
            &["api", "commands", key, "execute"],
            &group_query(&args),
            Some(json!({
                "args": args.trailing,
                "env": args.env("--env")?,
                "timeout_seconds": args.number::<u64>("--timeout")?,
            })),
        )
        .await?;

    let run = &body["execution"];
    print!("{}", str_field(run, "stdout"));
    eprint!("{}", str_field(run, "stderr"));
    let exit = run["exit_code"]
        .as_i64()
        .map(|c| format!("exit {}", c))
        .unwrap_or_else(|| "no exit code".to_string());
    eprintln!(
        "{} {} in {} ms ({})",
        style("──").dim(),
        styled_status(str_field(run, "status")),
        run["duration_ms"].as_i64().unwrap_or(0),
        exit
    );
    Ok(())
}

pub async fn list(client: &ApiClient, argv: &[String]) -> Result<()> {
    let args = CliArgs::parse(argv, 2, &["--group", "--lang"]);
    let mut query = group_query(&args);
    if let Some(lang) = args.value("--lang") {
        query.push(("language", lang.to_string()));
    }
    if args.has("--all") {
        query.push(("include_inactive", "true".to_string()));
    }

    let body = client.get(&["api", "commands"], &query).await?;
    let commands = body["commands"].as_array().cloned().unwrap_or_default();
    if commands.is_empty() {
        print_info("No commands stored yet. Add one with 'scriptd add <name> --code ...'.");
        return Ok(());
    }
    let mut section = GuideSection::new(&format!("Commands ({})", commands.len()));
    for cmd in &commands {
        section = section.bullet(&command_line(cmd));
    }
    section.print();
    println!();
    Ok(())
}

fn print_runs(title: &str, runs: &[Value]) {
    let mut section = GuideSection::new(title);
    if runs.is_empty() {
        section = section.text("No executions recorded.");
    }
    for run in runs {
        section = section.bullet(&format!(
            "{} {} {} ms exit={}",
            style(str_field(run, "executed_at")).dim(),
            styled_status(str_field(run, "status")),
            run["duration_ms"].as_i64().unwrap_or(0),
            run["exit_code"]
                .as_i64()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".into())
        ));
    }
    section.print();
}

pub async fn show(client: &ApiClient, argv: &[String]) -> Result<()> {
    let args = CliArgs::parse(argv, 2, &["--group"]);
    let key = args.require(0, "command name or id")?;
    let body = client
        .get(&["api", "commands", key], &group_query(&args))
        .await?;

    let cmd = &body["command"];
    let tags = cmd["tags"]
        .as_array()
        .map(|t| {
            t.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    GuideSection::new(str_field(cmd, "name"))
        .status("Id", str_field(cmd, "id"))
        .status("Language", str_field(cmd, "language"))
        .status("Group", cmd["group"].as_str().unwrap_or("(root)"))
        .status("Tags", &tags)
        .status("Description", str_field(cmd, "description"))
        .status(
            "Runs",
            &cmd["execution_count"].as_i64().unwrap_or(0).to_string(),
        )
        .print();
    println!("\n{}", style(str_field(cmd, "code")).dim());

    let runs = body["executions"].as_array().cloned().unwrap_or_default();
    print_runs("Recent executions", &runs);
    println!();
    Ok(())
}

pub async fn history(client: &ApiClient, argv: &[String]) -> Result<()> {
    let args = CliArgs::parse(argv, 2, &["--group", "--limit"]);
    let key = args.require(0, "command name or id")?;
    let mut query = group_query(&args);
    if let Some(limit) = args.number::<usize>("--limit")? {
        query.push(("limit", limit.to_string()));
    }
    let body = client
        .get(&["api", "commands", key, "executions"], &query)
        .await?;
    let runs = body["executions"].as_array().cloned().unwrap_or_default();
    print_runs(&format!("Executions of {}", key), &runs);
    println!();
    Ok(())
}

fn print_results(title: &str, body: &Value) {
    let results = body["results"].as_array().cloned().unwrap_or_default();
    let mut section = GuideSection::new(title);
    if results.is_empty() {
        section = section.text("No matches.");
    }
    for hit in &results {
        section = section.bullet(&format!(
            "{:.3}  {}",
            hit["score"].as_f64().unwrap_or(0.0),
            command_line(&hit["command"])
        ));
    }
    section.print();
    println!();
}

pub async fn search(client: &ApiClient, argv: &[String]) -> Result<()> {
    let args = CliArgs::parse(argv, 2, &["--top"]);
    if args.positionals.is_empty() {
        bail!("missing search query");
    }
    let q = args.positionals.join(" ");
    let mode = if args.has("--similar") { "similar" } else { "text" };
    let mut query = vec![("q", q.clone()), ("mode", mode.to_string())];
    if let Some(top) = args.number::<usize>("--top")? {
        query.push(("top_k", top.to_string()));
    }
    let body = client.get(&["api", "search"], &query).await?;
    print_results(&format!("Results for \"{}\"", q), &body);
    Ok(())
}

pub async fn similar(client: &ApiClient, argv: &[String]) -> Result<()> {
    let args = CliArgs::parse(argv, 2, &["--group", "--top"]);
    let key = args.require(0, "command name or id")?;
    let mut query = group_query(&args);
    if let Some(top) = args.number::<usize>("--top")? {
        query.push(("top_k", top.to_string()));
    }
    let body = client
        .get(&["api", "commands", key, "similar"], &query)
        .await?;
    print_results(&format!("Similar to {}", key), &body);
    Ok(())
}
