use colored::Colorize;
use rigging_cloud::{ActionType, FileStateStore, Plan, ProviderRegistry};
use rigging_cloud_local::LocalProvider;
use rigging_config::Settings;
use rigging_core::{CancellationToken, value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings and working directory shared by every command
pub struct Context {
    pub settings: Settings,
    pub settings_path: Option<PathBuf>,
    pub root: PathBuf,
}

impl Context {
    pub fn load() -> anyhow::Result<Self> {
        let (settings, settings_path) = rigging_config::load_settings()?;
        if let Some(path) = &settings_path {
            tracing::info!(path = %path.display(), "Using settings file");
        }
        Ok(Self {
            settings,
            settings_path,
            root: std::env::current_dir()?,
        })
    }

    pub fn state_store(&self, state: Option<&Path>) -> FileStateStore {
        let path = state.unwrap_or(&self.settings.state_path);
        FileStateStore::new(self.root.join(path))
    }

    /// Providers available to plan and apply. Relative local paths resolve
    /// against the working directory.
    pub fn registry(&self) -> ProviderRegistry {
        ProviderRegistry::new().with(Arc::new(LocalProvider::new(&self.root)))
    }
}

/// Token cancelled on the first Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("{}", "Interrupted, finishing calls in flight...".yellow());
            child.cancel();
        }
    });
    token
}

pub fn print_plan(plan: &Plan) {
    if !plan.has_changes() {
        println!("{}", "No changes. Infrastructure matches the desired state.".green());
        return;
    }

    println!("{}", "Planned changes:".bold());
    println!();
    for change in &plan.changes {
        let line = change.to_string();
        let line = match change.action {
            ActionType::Create if change.replacement.is_some() => line.yellow(),
            ActionType::Create => line.green(),
            ActionType::Update => line.yellow(),
            ActionType::Delete => line.red(),
            ActionType::NoOp => line.normal(),
        };
        println!("  {}", line);

        for attribute in &change.changed_attributes {
            let before = change
                .before
                .as_ref()
                .and_then(|b| b.attributes.get(attribute))
                .map(value::to_display)
                .unwrap_or_else(|| "(none)".to_string());
            let after = change
                .planned
                .get(attribute)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "(none)".to_string());
            println!("      {}: {} → {}", attribute.cyan(), before.dimmed(), after);
        }
    }
    println!();
    println!("{} {}", "Plan:".bold(), plan.summary());
}
