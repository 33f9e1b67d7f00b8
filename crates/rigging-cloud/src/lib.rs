//! Rigging Cloud
//!
//! The reconciliation engine: compares declared resources with the recorded
//! state snapshot, plans the minimal set of changes, and applies them through
//! pluggable resource providers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   rig CLI                        │
//! │              (rig plan / rig apply)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                rigging-cloud                     │
//! │  ┌────────────┐  ┌────────────┐  ┌───────────┐  │
//! │  │  desired   │─▶│ diff/plan  │─▶│   apply   │  │
//! │  └────────────┘  └─────▲──────┘  └─────┬─────┘  │
//! │                  ┌─────┴──────┐        │        │
//! │                  │ state store│◀───────┘        │
//! │                  └────────────┘                  │
//! │  trait ResourceProvider { describe, create,     │
//! │                           update, delete }      │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │ rigging-cloud │
//! │    -local     │
//! └───────────────┘
//! ```

pub mod apply;
pub mod desired;
pub mod diff;
pub mod error;
pub mod plan;
pub mod provider;
pub mod refresh;
pub mod resource;
pub mod state;

// Re-exports
pub use apply::{ApplyOptions, ApplyReport, ChangeOutcome, ChangeStatus, FailurePolicy, apply};
pub use desired::DesiredState;
pub use diff::plan;
pub use error::{CloudError, Result};
pub use plan::{ActionType, Change, Plan, PlanOptions, PlanSummary, PlannedValue, Replacement};
pub use provider::{ProviderRegistry, ResolvedAttributes, ResourceProvider, ResourceSchema};
pub use refresh::refresh;
pub use resource::{AttributeRef, AttributeValue, Resource, ResourceRef};
pub use state::{
    DeposedObject, FileStateStore, MemoryStateStore, ResourceRecord, STATE_VERSION, StateSnapshot,
    StateStore, parse_snapshot,
};
