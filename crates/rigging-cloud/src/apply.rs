//! Plan execution
//!
//! A single coordinator owns the working snapshot. It starts every change
//! whose prerequisites have been applied (up to `parallelism` at a time),
//! resolves its attributes against the snapshot as it is at that moment, and
//! merges each provider result back into the snapshot before persisting it.
//! A crash therefore leaves the state file describing exactly the changes
//! that completed.

use crate::error::{CloudError, Result};
use crate::plan::{ActionType, Change, Plan, Replacement};
use crate::provider::{ProviderRegistry, ResolvedAttributes};
use crate::refresh::call_error;
use crate::resource::ResourceRef;
use crate::state::{ResourceRecord, StateSnapshot, StateStore};
use chrono::Utc;
use rigging_core::{CallError, CallPolicy, CancellationToken, ValueMap, call_with_policy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// What to do with the rest of the plan after a change fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Start nothing new after the first failure
    #[default]
    Halt,
    /// Keep going with changes that do not depend on the failed one
    ContinueIndependent,
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Maximum number of provider calls in flight
    pub parallelism: usize,
    pub failure_policy: FailurePolicy,
    /// Timeout and retry for each provider call
    pub call_policy: CallPolicy,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            failure_policy: FailurePolicy::Halt,
            call_policy: CallPolicy::default(),
        }
    }
}

/// Outcome of a single change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ChangeStatus {
    Applied,
    Failed(String),
    /// A change it depends on failed
    Skipped,
    /// Never started because of a halt or cancellation
    NotAttempted,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeStatus::Applied => write!(f, "applied"),
            ChangeStatus::Failed(e) => write!(f, "failed: {e}"),
            ChangeStatus::Skipped => write!(f, "skipped"),
            ChangeStatus::NotAttempted => write!(f, "not attempted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOutcome {
    /// Position in the plan
    pub index: usize,
    pub action: ActionType,
    pub resource: ResourceRef,
    pub status: ChangeStatus,
    pub duration_ms: u64,
}

/// Result of applying a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    /// One entry per planned change, in plan order
    pub outcomes: Vec<ChangeOutcome>,

    /// Snapshot after the last completed change
    pub snapshot: StateSnapshot,

    /// Total execution time in milliseconds
    pub duration_ms: u64,

    pub cancelled: bool,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == ChangeStatus::Applied)
    }

    pub fn failed(&self) -> Vec<&ChangeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ChangeStatus::Failed(_)))
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&ChangeStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} failed, {} skipped, {} not attempted",
            self.count(|s| *s == ChangeStatus::Applied),
            self.count(|s| matches!(s, ChangeStatus::Failed(_))),
            self.count(|s| *s == ChangeStatus::Skipped),
            self.count(|s| *s == ChangeStatus::NotAttempted),
        )
    }
}

enum Slot {
    Pending,
    Running(Instant),
    Done(ChangeStatus, Duration),
}

enum Operation {
    Create(ValueMap),
    Update(String, ValueMap),
    Delete(String),
}

type CallResult = std::result::Result<Option<ResolvedAttributes>, CallError<CloudError>>;

/// Execute `plan` against `snapshot`, persisting through `store` after each
/// completed change.
///
/// Change failures are reported in the returned [`ApplyReport`]; `Err` is
/// reserved for a stale plan and for failures to persist state.
pub async fn apply(
    plan: Plan,
    snapshot: StateSnapshot,
    registry: &ProviderRegistry,
    store: &dyn StateStore,
    options: &ApplyOptions,
    cancel: &CancellationToken,
) -> Result<ApplyReport> {
    if plan.lineage != snapshot.lineage || plan.serial != snapshot.serial {
        return Err(CloudError::validation(format!(
            "plan was computed against state serial {} but the state is at serial {}; plan again",
            plan.serial, snapshot.serial
        )));
    }

    for (i, change) in plan.changes.iter().enumerate() {
        if let Some(&j) = change.requires.iter().find(|&&j| j >= i) {
            return Err(CloudError::validation(format!(
                "{} requires change #{j}, which does not come before it",
                change.label()
            )));
        }
    }

    let started = Instant::now();
    let Plan {
        changes, variables, ..
    } = plan;
    let mut snapshot = snapshot;
    let mut slots: Vec<Slot> = changes.iter().map(|_| Slot::Pending).collect();
    let mut inputs: Vec<ValueMap> = vec![ValueMap::new(); changes.len()];
    let mut tasks: JoinSet<(usize, CallResult)> = JoinSet::new();
    let parallelism = options.parallelism.max(1);
    let mut halted = false;

    loop {
        if !halted && !cancel.is_cancelled() {
            for i in 0..changes.len() {
                if tasks.len() >= parallelism {
                    break;
                }
                if !matches!(slots[i], Slot::Pending) {
                    continue;
                }
                let change = &changes[i];

                let blocked = change.requires.iter().any(|&j| {
                    matches!(
                        slots[j],
                        Slot::Done(ChangeStatus::Failed(_) | ChangeStatus::Skipped, _)
                    )
                });
                if blocked {
                    tracing::info!(change = %change.label(), "Skipped: a prerequisite failed");
                    slots[i] = Slot::Done(ChangeStatus::Skipped, Duration::ZERO);
                    continue;
                }
                let ready = change
                    .requires
                    .iter()
                    .all(|&j| matches!(slots[j], Slot::Done(ChangeStatus::Applied, _)));
                if !ready {
                    continue;
                }

                let prepared = prepare(change, &snapshot, &variables)
                    .and_then(|op| Ok((op, registry.get(&change.resource.resource_type)?)));
                let (operation, provider) = match prepared {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        tracing::warn!(change = %change.label(), error = %e, "Change failed");
                        slots[i] = Slot::Done(ChangeStatus::Failed(e.to_string()), Duration::ZERO);
                        if options.failure_policy == FailurePolicy::Halt {
                            halted = true;
                            break;
                        }
                        continue;
                    }
                };

                tracing::info!(change = %change.label(), "Applying change");
                if let Operation::Create(attrs) | Operation::Update(_, attrs) = &operation {
                    inputs[i] = attrs.clone();
                }
                slots[i] = Slot::Running(Instant::now());

                let resource_type = change.resource.resource_type.clone();
                let policy = options.call_policy.clone();
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    let result = match &operation {
                        Operation::Create(attrs) => {
                            call_with_policy(&policy, &cancel, |_| {
                                provider.create(&resource_type, attrs)
                            })
                            .await
                            .map(Some)
                        }
                        Operation::Update(id, attrs) => {
                            call_with_policy(&policy, &cancel, |_| {
                                provider.update(&resource_type, id, attrs)
                            })
                            .await
                            .map(Some)
                        }
                        Operation::Delete(id) => {
                            call_with_policy(&policy, &cancel, |_| {
                                provider.delete(&resource_type, id)
                            })
                            .await
                            .map(|()| None)
                        }
                    };
                    (i, result)
                });
            }
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        let (i, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                // A panicking provider; the task index is lost with it.
                tracing::warn!(error = %e, "Provider task aborted");
                halted = true;
                continue;
            }
        };

        let change = &changes[i];
        let elapsed = match slots[i] {
            Slot::Running(at) => at.elapsed(),
            _ => Duration::ZERO,
        };
        let status = match result {
            Ok(resolved) => {
                merge(&mut snapshot, change, &inputs[i], resolved);
                snapshot.touch();
                store.save(&snapshot).await?;
                tracing::info!(
                    change = %change.label(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Change applied"
                );
                ChangeStatus::Applied
            }
            Err(CallError::Cancelled) => ChangeStatus::NotAttempted,
            Err(e) => {
                let err = call_error(e, &change.label());
                tracing::warn!(change = %change.label(), error = %err, "Change failed");
                if options.failure_policy == FailurePolicy::Halt {
                    halted = true;
                }
                ChangeStatus::Failed(err.to_string())
            }
        };
        slots[i] = Slot::Done(status, elapsed);
    }

    let outcomes = changes
        .iter()
        .zip(slots)
        .enumerate()
        .map(|(index, (change, slot))| {
            let (status, elapsed) = match slot {
                Slot::Done(status, elapsed) => (status, elapsed),
                Slot::Pending | Slot::Running(_) => (ChangeStatus::NotAttempted, Duration::ZERO),
            };
            ChangeOutcome {
                index,
                action: change.action,
                resource: change.resource.clone(),
                status,
                duration_ms: elapsed.as_millis() as u64,
            }
        })
        .collect();

    let report = ApplyReport {
        outcomes,
        snapshot,
        duration_ms: started.elapsed().as_millis() as u64,
        cancelled: cancel.is_cancelled(),
    };
    tracing::debug!(summary = %report, "Apply finished");
    Ok(report)
}

/// Resolve the provider input for `change` against the live snapshot.
fn prepare(change: &Change, snapshot: &StateSnapshot, variables: &ValueMap) -> Result<Operation> {
    let target_id = || {
        change.target_id().map(str::to_string).ok_or_else(|| {
            CloudError::validation(format!("{}: no recorded object", change.label()))
        })
    };

    match change.action {
        ActionType::Delete => Ok(Operation::Delete(target_id()?)),
        ActionType::Create | ActionType::Update => {
            let scope = snapshot.scope(variables);
            let mut attributes = ValueMap::new();
            for (key, value) in &change.after {
                let resolved = value.resolve(&scope).map_err(|e| {
                    CloudError::validation(format!("{}: attribute '{key}': {e}", change.resource))
                })?;
                if let Some(v) = resolved {
                    attributes.insert(key.clone(), v);
                }
            }
            if change.action == ActionType::Update {
                Ok(Operation::Update(target_id()?, attributes))
            } else {
                Ok(Operation::Create(attributes))
            }
        }
        ActionType::NoOp => Err(CloudError::validation(format!(
            "{}: no-op changes are not executable",
            change.resource
        ))),
    }
}

/// Fold a provider result into the snapshot.
fn merge(
    snapshot: &mut StateSnapshot,
    change: &Change,
    inputs: &ValueMap,
    resolved: Option<ResolvedAttributes>,
) {
    let resource = &change.resource;
    match (change.action, resolved) {
        (ActionType::Delete, _) => {
            if let Some(id) = change.target_id() {
                snapshot.remove_object(resource, id);
            }
        }
        (ActionType::Create | ActionType::Update, Some(result)) => {
            if change.replacement == Some(Replacement::CreateBeforeDestroy)
                && snapshot.get(resource).map(|r| r.id.as_str()) == change.target_id()
            {
                snapshot.depose(resource);
            }

            let mut attributes = inputs.clone();
            attributes.extend(result.attributes);
            let declared = change.after.keys().cloned().collect();
            let record = match snapshot.remove(resource) {
                Some(mut existing) if change.action == ActionType::Update => {
                    existing.id = result.id;
                    existing.attributes = attributes;
                    existing.depends_on = change.depends_on.clone();
                    existing.declared = declared;
                    existing.updated_at = Utc::now();
                    existing
                }
                _ => ResourceRecord::new(result.id, attributes)
                    .with_dependencies(change.depends_on.clone())
                    .with_declared(declared),
            };
            snapshot.insert(resource.clone(), record);
        }
        _ => {}
    }
}
