use anyhow::Result;
use console::style;
use reqwest::Method;
use serde_json::{Value, json};

use super::CliArgs;
use super::client::ApiClient;
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};

fn render(node: &Value, depth: usize, out: &mut Vec<String>) {
    out.push(format!(
        "{}{} {}",
        "  ".repeat(depth),
        style(node["name"].as_str().unwrap_or("?")).white().bold(),
        style(format!("({} commands)", node["command_count"].as_i64().unwrap_or(0))).dim()
    ));
    for child in node["children"].as_array().into_iter().flatten() {
        render(child, depth + 1, out);
    }
}

pub async fn tree(client: &ApiClient) -> Result<()> {
    let body = client.get(&["api", "groups"], &[]).await?;
    let roots = body["groups"].as_array().cloned().unwrap_or_default();
    if roots.is_empty() {
        print_info("No groups yet. Commands added with --group create them.");
        return Ok(());
    }
    let mut lines = Vec::new();
    for root in &roots {
        render(root, 0, &mut lines);
    }
    let mut section = GuideSection::new("Groups");
    for line in lines {
        section = section.text(&line);
    }
    section.print();
    println!();
    Ok(())
}

pub async fn run_group_command(client: &ApiClient, argv: &[String]) -> Result<()> {
    let sub_cmd = argv.get(2).map(String::as_str).unwrap_or("");
    let args = CliArgs::parse(argv, 3, &["--parent", "--desc"]);

    match sub_cmd {
        "create" => {
            let name = args.require(0, "group name")?;
            let body = client
                .post(
                    &["api", "groups"],
                    json!({
                        "name": name,
                        "description": args.value("--desc").unwrap_or(""),
                        "parent": args.value("--parent"),
                    }),
                )
                .await?;
            print_success(&format!(
                "Created group '{}'",
                body["group"]["name"].as_str().unwrap_or(name)
            ));
        }
        "move" => {
            let name = args.require(0, "group name")?;
            let parent = args.value("--parent").filter(|p| *p != "none");
            client
                .call(
                    Method::PATCH,
                    &["api", "groups", name],
                    &[],
                    Some(json!({ "parent": parent })),
                )
                .await?;
            match parent {
                Some(p) => print_success(&format!("Moved '{}' under '{}'", name, p)),
                None => print_success(&format!("Moved '{}' to the root", name)),
            }
        }
        "delete" | "rm" => {
            let name = args.require(0, "group name")?;
            let query = if args.has("--cascade") {
                vec![("cascade", "true".to_string())]
            } else {
                vec![]
            };
            let body = client
                .call(Method::DELETE, &["api", "groups", name], &query, None)
                .await?;
            let removed = &body["removed"];
            print_success(&format!(
                "Deleted {} group(s), deactivated {} command(s)",
                removed["groups_removed"].as_u64().unwrap_or(0),
                removed["commands_deactivated"].as_u64().unwrap_or(0)
            ));
        }
        _ => {
            print_error("Unknown or missing group command. Expected: create, move, delete");
            GuideSection::new("scriptd group")
                .hint("scriptd group create ops --desc \"Operations\"", "")
                .hint("scriptd group move backups --parent ops", "")
                .hint("scriptd group delete ops --cascade", "")
                .print();
            println!();
        }
    }
    Ok(())
}
