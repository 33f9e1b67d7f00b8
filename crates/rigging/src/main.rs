mod commands;
mod utils;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rig")]
#[command(about = "Declare it, plan it, converge it.", long_about = None)]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes needed to reach the desired state
    Plan(PlanArgs),
    /// Plan and apply the changes
    Apply(ApplyArgs),
    /// Run a playbook against an inventory
    Run(RunArgs),
    /// Check a desired-state, playbook or inventory file
    Validate {
        /// File to check
        file: PathBuf,
    },
    /// Inspect the state snapshot
    #[command(subcommand)]
    State(StateCommands),
    /// Show version information
    Version,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Desired-state document
    pub desired: PathBuf,
    /// State file (defaults to the `state_path` setting)
    #[arg(long, env = "RIGGING_STATE")]
    pub state: Option<PathBuf>,
    /// Re-read every recorded object from its provider first
    #[arg(long)]
    pub refresh: bool,
    /// Only plan these resources (type.name) and their dependencies
    #[arg(short, long = "target")]
    pub targets: Vec<String>,
    /// Plan the deletion of everything in the state
    #[arg(long)]
    pub destroy: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub plan: PlanArgs,
    /// Apply without asking
    #[arg(short, long)]
    pub yes: bool,
    /// Independent changes applied at once
    #[arg(short, long)]
    pub parallelism: Option<usize>,
    /// Keep applying changes that do not depend on a failed one
    #[arg(long)]
    pub continue_on_error: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Playbook document
    pub playbook: PathBuf,
    /// Inventory document
    #[arg(short, long)]
    pub inventory: PathBuf,
    /// Hosts worked on at once
    #[arg(short, long)]
    pub forks: Option<usize>,
    /// State file used for `from_state` inventory entries
    #[arg(long, env = "RIGGING_STATE")]
    pub state: Option<PathBuf>,
}

#[derive(Subcommand)]
enum StateCommands {
    /// Print the recorded resources
    Show {
        /// State file (defaults to the `state_path` setting)
        #[arg(long, env = "RIGGING_STATE")]
        state: Option<PathBuf>,
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗ Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // stdout carries plans and reports; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn dispatch(command: Commands) -> anyhow::Result<ExitCode> {
    // Version needs no settings file
    if matches!(command, Commands::Version) {
        println!("rigging {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let ctx = utils::Context::load()?;

    match command {
        Commands::Plan(args) => commands::plan::handle(&ctx, &args).await,
        Commands::Apply(args) => commands::apply::handle(&ctx, &args).await,
        Commands::Run(args) => commands::run::handle(&ctx, &args).await,
        Commands::Validate { file } => commands::validate::handle(&ctx, &file).await,
        Commands::State(StateCommands::Show { state, json }) => {
            commands::state::handle_show(&ctx, state.as_deref(), json).await
        }
        Commands::Version => Ok(ExitCode::SUCCESS),
    }
}
