//! Refresh recorded objects from their providers before planning

use crate::error::{CloudError, Result};
use crate::provider::ProviderRegistry;
use crate::state::StateSnapshot;
use rigging_core::{CallError, CallPolicy, CancellationToken, call_with_policy};

/// Return a copy of `snapshot` with every recorded object re-read through
/// `describe`. Objects that no longer exist are dropped, so the next plan
/// creates them again. The serial is left alone; nothing is persisted.
pub async fn refresh(
    snapshot: &StateSnapshot,
    registry: &ProviderRegistry,
    policy: &CallPolicy,
    cancel: &CancellationToken,
) -> Result<StateSnapshot> {
    let mut refreshed = snapshot.clone();

    for (resource, record) in &snapshot.resources {
        let provider = registry.get(&resource.resource_type)?;
        let observed = call_with_policy(policy, cancel, |_| provider.describe(resource, &record.id))
            .await
            .map_err(|e| call_error(e, &format!("refresh {resource}")))?;

        match observed {
            Some(found) => {
                if let Some(entry) = refreshed.resources.get_mut(resource) {
                    entry.id = found.id;
                    entry.attributes = found.attributes;
                }
            }
            None => {
                tracing::warn!(resource = %resource, id = %record.id, "Object no longer exists");
                refreshed.remove(resource);
            }
        }
    }

    tracing::debug!(
        before = snapshot.len(),
        after = refreshed.len(),
        "Refreshed state"
    );
    Ok(refreshed)
}

/// Flatten a policy-wrapped provider failure into a `CloudError`.
pub(crate) fn call_error(err: CallError<CloudError>, what: &str) -> CloudError {
    match err {
        CallError::Failed(e) => e,
        CallError::Timeout(limit) => {
            CloudError::Timeout(format!("{what}: no answer after {}s", limit.as_secs_f64()))
        }
        CallError::Cancelled => CloudError::Provider(format!("{what}: cancelled")),
    }
}
