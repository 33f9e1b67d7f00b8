use crate::ApplyArgs;
use crate::utils::{self, Context};
use colored::Colorize;
use rigging_cloud::{ApplyOptions, ChangeStatus, FailurePolicy};
use rigging_config::FailureMode;
use std::process::ExitCode;

pub async fn handle(ctx: &Context, args: &ApplyArgs) -> anyhow::Result<ExitCode> {
    let cancel = utils::cancel_on_ctrl_c();
    let (plan, snapshot) = super::plan::build(ctx, &args.plan, &cancel).await?;
    utils::print_plan(&plan);

    if !plan.has_changes() {
        return Ok(ExitCode::SUCCESS);
    }
    if !args.yes {
        println!();
        println!("Run again with {} to apply these changes.", "--yes".cyan());
        return Ok(ExitCode::SUCCESS);
    }

    let failure_policy = if args.continue_on_error {
        FailurePolicy::ContinueIndependent
    } else {
        match ctx.settings.failure_policy {
            FailureMode::Halt => FailurePolicy::Halt,
            FailureMode::Continue => FailurePolicy::ContinueIndependent,
        }
    };
    let options = ApplyOptions {
        parallelism: args.parallelism.unwrap_or(ctx.settings.parallelism),
        failure_policy,
        call_policy: ctx.settings.provider_policy(),
    };
    if options.parallelism == 0 {
        anyhow::bail!("--parallelism must be at least 1");
    }

    println!();
    println!("{}", "Applying...".blue());
    let store = ctx.state_store(args.plan.state.as_deref());
    let registry = ctx.registry();
    let report = rigging_cloud::apply(plan, snapshot, &registry, &store, &options, &cancel).await?;

    for outcome in &report.outcomes {
        let label = format!("{} {}", outcome.action, outcome.resource);
        match &outcome.status {
            ChangeStatus::Applied => {
                println!("  {} {} ({}ms)", "✓".green(), label, outcome.duration_ms)
            }
            ChangeStatus::Failed(error) => {
                println!("  {} {}: {}", "✗".red(), label, error.as_str().red())
            }
            other => println!("  {} {} ({})", "-".dimmed(), label, other),
        }
    }

    println!();
    if report.cancelled {
        println!("{}", "Apply cancelled.".yellow());
    }
    if report.is_success() {
        println!("{} {}", "✓ Apply complete:".green().bold(), report);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{} {}", "✗ Apply failed:".red().bold(), report);
        Ok(ExitCode::FAILURE)
    }
}
