use crate::RunArgs;
use crate::utils::{self, Context};
use colored::Colorize;
use rigging_cloud::StateStore;
use rigging_converge::{InventoryDocument, Outcome, Playbook, RunOptions, ShellExecutor};
use std::process::ExitCode;
use std::sync::Arc;

pub async fn handle(ctx: &Context, args: &RunArgs) -> anyhow::Result<ExitCode> {
    let playbook = Playbook::from_file(&args.playbook).await?;
    let document = InventoryDocument::from_file(&args.inventory).await?;

    // Hosts declared by provisioned resources come from the snapshot
    let snapshot = if document.from_state.is_empty() {
        None
    } else {
        let store = ctx.state_store(args.state.as_deref());
        tracing::info!(state = %store.path().display(), "Reading hosts from state");
        Some(store.load().await?)
    };
    let inventory = document.into_inventory(|resource_type| {
        snapshot
            .as_ref()
            .map(|s| s.outputs_of_type(resource_type))
            .unwrap_or_default()
    })?;

    let options = RunOptions {
        forks: args.forks.unwrap_or(ctx.settings.forks),
        call_policy: ctx.settings.executor_policy(),
    };
    println!(
        "{} {} ({} hosts, forks={})",
        "Running".blue(),
        args.playbook.display().to_string().cyan(),
        inventory.len(),
        options.forks
    );

    let cancel = utils::cancel_on_ctrl_c();
    let executor = Arc::new(ShellExecutor::new());
    let report = rigging_converge::run(&playbook, &inventory, executor, &options, &cancel).await?;

    for play in &report.plays {
        println!();
        println!("{} {}", "PLAY".bold(), play.name.bold());
        for host in &play.hosts {
            for result in &host.results {
                let status = result.outcome.to_string();
                let status = match result.outcome {
                    Outcome::Changed => status.yellow(),
                    Outcome::Unchanged => status.green(),
                    Outcome::Skipped => status.cyan(),
                    Outcome::Failed | Outcome::Unreachable => status.red(),
                };
                let handler = if result.handler { " (handler)" } else { "" };
                print!("  {}: [{}] {}{}", status, host.alias, result.action, handler);
                match &result.message {
                    Some(message) => println!(" => {}", message),
                    None => println!(),
                }
            }
        }
    }

    println!();
    println!("{}", "PLAY RECAP".bold());
    let failed = report.failed_hosts();
    for (alias, recap) in report.recap() {
        let name = if failed.contains(alias.as_str()) {
            alias.red()
        } else if recap.changed > 0 {
            alias.yellow()
        } else {
            alias.green()
        };
        println!("  {:<32} : {}", name, recap);
    }
    if report.cancelled {
        println!("{}", "Run cancelled.".yellow());
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
