//! Remote executor trait definition

use crate::error::ExecError;
use crate::inventory::Host;
use crate::module::ModuleKind;
use async_trait::async_trait;
use rigging_core::ValueMap;

/// What a module invocation did on the host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    /// The module performed a mutating operation
    pub changed: bool,
    /// Module-specific result data (stdout, rc, ...)
    pub payload: ValueMap,
}

impl ExecOutput {
    pub fn changed() -> Self {
        Self {
            changed: true,
            payload: ValueMap::new(),
        }
    }

    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

/// Channel that runs remote modules on a host
///
/// Implementations must honour the idempotency contract of each module:
/// inspect first, act only when needed, and report `changed` only after a
/// mutating operation. The engine only sends remote modules; local ones
/// (`debug`, `set_fact`, `assert`) never reach the executor.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Returns the executor name (e.g., "shell")
    fn name(&self) -> &str;

    async fn execute(
        &self,
        host: &Host,
        module: ModuleKind,
        params: &ValueMap,
    ) -> Result<ExecOutput, ExecError>;
}
