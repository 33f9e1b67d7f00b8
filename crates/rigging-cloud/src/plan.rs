//! Plan types for resource reconciliation

use crate::provider::ResolvedAttributes;
use crate::resource::{AttributeValue, ResourceRef};
use rigging_core::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Type of change to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// How a resource whose immutable attribute changed gets replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Replacement {
    /// New object first, old one deleted after dependents moved over
    CreateBeforeDestroy,
    /// Old object deleted first (unique names and the like)
    DestroyBeforeCreate,
}

/// Value an attribute will have after apply, as far as planning can tell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum PlannedValue {
    Known(Value),
    /// Depends on a resource that is still to be created or replaced
    Unknown,
}

impl fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedValue::Known(v) => write!(f, "{v}"),
            PlannedValue::Unknown => write!(f, "(known after apply)"),
        }
    }
}

/// One planned change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub action: ActionType,

    pub resource: ResourceRef,

    /// The object being updated or deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<ResolvedAttributes>,

    /// Declared attributes, resolved again at apply time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub after: BTreeMap<String, AttributeValue>,

    /// Plan-time view of `after`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub planned: BTreeMap<String, PlannedValue>,

    /// Attributes that differ from the recorded object
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_attributes: Vec<String>,

    /// Set on both halves of a replacement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<Replacement>,

    /// The delete targets a deposed object
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deposed: bool,

    /// Dependencies recorded with the object on create/update
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceRef>,

    /// Plan indices of the changes that must succeed first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<usize>,
}

impl Change {
    pub(crate) fn new(action: ActionType, resource: ResourceRef) -> Self {
        Self {
            action,
            resource,
            before: None,
            after: BTreeMap::new(),
            planned: BTreeMap::new(),
            changed_attributes: Vec::new(),
            replacement: None,
            deposed: false,
            depends_on: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub(crate) fn delete(resource: ResourceRef, before: ResolvedAttributes) -> Self {
        let mut change = Self::new(ActionType::Delete, resource);
        change.before = Some(before);
        change
    }

    /// Provider ID of the object this change acts on, if it exists
    pub fn target_id(&self) -> Option<&str> {
        self.before.as_ref().map(|b| b.id.as_str())
    }

    /// Unique, human-readable key within a plan
    pub fn label(&self) -> String {
        match (self.action, self.deposed) {
            (ActionType::Delete, true) => format!(
                "delete {} (deposed {})",
                self.resource,
                self.target_id().unwrap_or("?")
            ),
            (action, _) => format!("{action} {}", self.resource),
        }
    }

    /// Plan-time values that are fully known
    pub fn known_values(&self) -> ValueMap {
        self.planned
            .iter()
            .filter_map(|(k, v)| match v {
                PlannedValue::Known(v) => Some((k.clone(), v.clone())),
                PlannedValue::Unknown => None,
            })
            .collect()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match (self.action, self.replacement) {
            (ActionType::Create, Some(_)) => "+/-",
            (ActionType::Delete, Some(_)) => "-/+",
            (ActionType::Create, None) => "+",
            (ActionType::Update, _) => "~",
            (ActionType::Delete, None) => "-",
            (ActionType::NoOp, _) => " ",
        };
        write!(f, "{symbol} {}", self.label())?;
        if self.replacement.is_some() {
            write!(f, " (replace)")?;
        }
        Ok(())
    }
}

/// Options controlling what gets planned
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Restrict the plan to these resources and their dependencies
    pub targets: Vec<ResourceRef>,

    /// Plan deletion of everything recorded
    pub destroy: bool,
}

/// Ordered list of changes, consumed once by apply.
///
/// Neither `Clone` nor `Deserialize`: the only way to get a plan is to
/// compute one, and applying it moves it.
#[derive(Debug, PartialEq, Serialize)]
pub struct Plan {
    /// Changes in execution order
    pub changes: Vec<Change>,

    /// Resources that need no change
    pub unchanged: Vec<ResourceRef>,

    /// Document variables, needed to resolve attributes at apply time
    pub variables: ValueMap,

    /// Lineage of the snapshot the plan was computed against
    pub lineage: String,

    /// Serial of the snapshot the plan was computed against
    pub serial: u64,
}

impl Plan {
    /// Whether the plan has any changes
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Get changes by type
    pub fn changes_by_type(&self, action: ActionType) -> Vec<&Change> {
        self.changes.iter().filter(|c| c.action == action).collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.changes_by_type(ActionType::Create).len(),
            update: self.changes_by_type(ActionType::Update).len(),
            delete: self.changes_by_type(ActionType::Delete).len(),
            no_change: self.unchanged.len(),
        }
    }
}

/// Summary of planned changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}
