//! Rigging Core
//!
//! Building blocks shared by the reconciliation engine (`rigging-cloud`) and
//! the convergence engine (`rigging-converge`):
//!
//! - [`expr`]: a small, pure expression language for references, parameters
//!   and conditions
//! - [`template`]: `${ ... }` interpolation on top of it
//! - [`graph`]: dependency graphs with cycle detection and deterministic
//!   topological order
//! - [`policy`]: per-call timeout and retry with cooperative cancellation

pub mod error;
pub mod expr;
pub mod graph;
pub mod policy;
pub mod template;
pub mod value;

// Re-exports
pub use error::{CoreError, Result};
pub use expr::{Expr, Expression, LayeredScope, PathSegment, Scope, VarPath};
pub use graph::DependencyGraph;
pub use policy::{CallError, CallPolicy, RetryPolicy, call_with_policy};
pub use template::{Template, render_value};
pub use tokio_util::sync::CancellationToken;
pub use value::{Value, ValueMap};
