use crate::PlanArgs;
use crate::utils::{self, Context};
use colored::Colorize;
use rigging_cloud::{DesiredState, Plan, PlanOptions, ResourceRef, StateSnapshot, StateStore};
use rigging_core::CancellationToken;
use std::process::ExitCode;

/// Exit status when the plan has pending changes
const CHANGES_PENDING: u8 = 2;

pub async fn handle(ctx: &Context, args: &PlanArgs) -> anyhow::Result<ExitCode> {
    let cancel = utils::cancel_on_ctrl_c();
    let (plan, _) = build(ctx, args, &cancel).await?;
    utils::print_plan(&plan);

    if plan.has_changes() {
        Ok(ExitCode::from(CHANGES_PENDING))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Load the desired state and the snapshot, refresh if asked, and plan.
/// Returns the snapshot the plan was computed against.
pub async fn build(
    ctx: &Context,
    args: &PlanArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<(Plan, StateSnapshot)> {
    let desired = DesiredState::from_file(&args.desired).await?;
    let store = ctx.state_store(args.state.as_deref());
    let mut snapshot = store.load().await?;
    let registry = ctx.registry();

    tracing::info!(
        desired = %args.desired.display(),
        state = %store.path().display(),
        resources = desired.resources().len(),
        recorded = snapshot.len(),
        "Planning"
    );

    if args.refresh && !snapshot.is_empty() {
        println!("{}", "Refreshing recorded resources...".blue());
        snapshot = rigging_cloud::refresh(
            &snapshot,
            &registry,
            &ctx.settings.provider_policy(),
            cancel,
        )
        .await?;
    }

    let targets = args
        .targets
        .iter()
        .map(|t| t.parse::<ResourceRef>())
        .collect::<Result<Vec<_>, _>>()?;
    let options = PlanOptions {
        targets,
        destroy: args.destroy,
    };

    let plan = rigging_cloud::plan(&desired, &snapshot, &registry, &options)?;
    Ok((plan, snapshot))
}
