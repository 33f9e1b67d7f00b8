use crate::utils::Context;
use colored::Colorize;
use rigging_cloud::StateStore;
use rigging_core::value;
use std::path::Path;
use std::process::ExitCode;

pub async fn handle_show(
    ctx: &Context,
    state: Option<&Path>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let store = ctx.state_store(state);
    let snapshot = store.load().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("State: {}", store.path().display().to_string().cyan());
    println!(
        "  serial {} | lineage {} | updated {}",
        snapshot.serial,
        snapshot.lineage,
        snapshot.updated_at.to_rfc3339()
    );

    if snapshot.is_empty() {
        println!("{}", "No resources recorded.".yellow());
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    for (resource, record) in &snapshot.resources {
        println!("{} {}", resource.to_string().bold(), format!("({})", record.id).dimmed());
        for (key, v) in &record.attributes {
            println!("    {} = {}", key.cyan(), value::to_display(v));
        }
    }
    for deposed in &snapshot.deposed {
        println!(
            "{} {}",
            deposed.resource.to_string().red(),
            format!("(deposed: {})", deposed.record.id).dimmed()
        );
    }
    Ok(ExitCode::SUCCESS)
}
