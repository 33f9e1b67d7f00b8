use crate::utils::Context;
use colored::Colorize;
use rigging_cloud::DesiredState;
use rigging_converge::{InventoryDocument, Playbook};
use std::path::Path;
use std::process::ExitCode;

enum DocumentKind {
    Desired,
    Playbook,
    Inventory,
}

/// Guess the document kind from its top-level keys
fn detect(content: &str) -> anyhow::Result<DocumentKind> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    let has = |key: &str| value.get(key).is_some();
    Ok(if has("plays") {
        DocumentKind::Playbook
    } else if has("hosts") || has("from_state") {
        DocumentKind::Inventory
    } else {
        DocumentKind::Desired
    })
}

pub async fn handle(ctx: &Context, file: &Path) -> anyhow::Result<ExitCode> {
    println!("{} {}", "Validating".blue(), file.display().to_string().cyan());
    if let Some(path) = &ctx.settings_path {
        println!("Settings: {}", path.display().to_string().cyan());
    }

    let content = tokio::fs::read_to_string(file).await?;
    match check(ctx, &content) {
        Ok(summary) => {
            println!("{}", "✓ Document is valid".green().bold());
            for line in summary {
                println!("  {}", line);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", "✗ Invalid document".red().bold());
            eprintln!("  {:#}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn check(ctx: &Context, content: &str) -> anyhow::Result<Vec<String>> {
    match detect(content)? {
        DocumentKind::Desired => {
            let desired = DesiredState::from_yaml_str(content)?;
            let registry = ctx.registry();
            let mut summary = vec![format!("desired state, {} resources", desired.resources().len())];
            for resource in desired.resources() {
                registry.get(&resource.resource_type)?;
                summary.push(format!("- {}", resource.reference()));
            }
            Ok(summary)
        }
        DocumentKind::Playbook => {
            let playbook = Playbook::from_yaml_str(content)?;
            let mut summary = vec![format!("playbook, {} plays", playbook.plays().len())];
            for play in playbook.plays() {
                summary.push(format!(
                    "- {} (hosts: {}, {} actions, {} handlers)",
                    play.name,
                    play.hosts,
                    play.actions.len(),
                    play.handlers.len()
                ));
            }
            Ok(summary)
        }
        DocumentKind::Inventory => {
            let document = InventoryDocument::from_yaml_str(content)?;
            let sources = document.from_state.len();
            // Hosts from state only exist after apply
            let inventory = document.into_inventory(|_| Default::default())?;
            let mut summary = vec![format!(
                "inventory, {} hosts, {} state sources",
                inventory.len(),
                sources
            )];
            for host in inventory.hosts() {
                summary.push(format!("- {} ({})", host.alias, host.address));
            }
            Ok(summary)
        }
    }
}
