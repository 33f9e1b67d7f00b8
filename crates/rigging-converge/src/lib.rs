//! Rigging Converge
//!
//! The convergence engine: runs ordered, idempotent actions on a fleet of
//! hosts through a pluggable remote executor, and fires deduplicated
//! handlers for actions that changed something.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐
//! │  playbook  │   │ inventory  │◀── outputs of rigging-cloud
//! └─────┬──────┘   └─────┬──────┘
//!       └───────┬────────┘
//!         ┌─────▼─────┐   one task per host, at most `forks` at once
//!         │  engine   │
//!         └─────┬─────┘
//!               │ trait RemoteExecutor { execute }
//!         ┌─────▼─────────┐
//!         │ ShellExecutor │  sh -c / ssh
//!         └───────────────┘
//! ```

pub mod engine;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod module;
pub mod playbook;
pub mod report;
pub mod shell;

// Re-exports
pub use engine::{DEFAULT_FORKS, RunOptions, run};
pub use error::{ConvergeError, ExecError, Result};
pub use executor::{ExecOutput, RemoteExecutor};
pub use inventory::{ALL, Host, Inventory, InventoryDocument, StateSource, hosts_from_outputs};
pub use module::{ModuleKind, ModuleSchema, ParamKind, ParamSpec};
pub use playbook::{Action, Play, Playbook};
pub use report::{ActionResult, HostRun, HostStatus, Outcome, PlayReport, Recap, RunReport};
pub use shell::{CHANGED_MARKER, ShellExecutor};
