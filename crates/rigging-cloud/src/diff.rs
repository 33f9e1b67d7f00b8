//! Diff computation: desired resources + snapshot → ordered plan
//!
//! Resources are visited in dependency order so that every reference can be
//! checked against what its target will look like after apply. A value that
//! depends on a resource still to be created or replaced is unknown and
//! counts as a difference.
//!
//! Ordering rules between changes:
//! - a dependency's create/update runs before its dependents' create/update
//! - deletes run dependents first, using the dependencies recorded in state
//! - create-before-destroy: the new object, then every dependent's change,
//!   then the delete of the old object
//! - destroy-before-create: the delete, then the create
//! - an update that stops referencing an orphan runs before the orphan's delete
//!
//! Ties are broken by declaration order, then by snapshot order.

use crate::desired::DesiredState;
use crate::error::{CloudError, Result};
use crate::plan::{ActionType, Change, Plan, PlanOptions, PlannedValue, Replacement};
use crate::provider::{ProviderRegistry, ResolvedAttributes};
use crate::resource::{AttributeValue, ResourceRef, VAR_ROOT};
use crate::state::{ResourceRecord, StateSnapshot};
use rigging_core::value::values_equal;
use rigging_core::{DependencyGraph, Value, ValueMap};
use std::collections::{BTreeMap, BTreeSet};

/// Compute the plan that moves `snapshot` to `desired`.
pub fn plan(
    desired: &DesiredState,
    snapshot: &StateSnapshot,
    registry: &ProviderRegistry,
    options: &PlanOptions,
) -> Result<Plan> {
    for target in &options.targets {
        if !desired.contains(target) && snapshot.get(target).is_none() {
            return Err(CloudError::validation(format!("unknown target {target}")));
        }
    }

    let mut planner = Planner::new(desired, snapshot, registry);
    if options.destroy {
        planner.plan_destroy(&options.targets)?;
    } else {
        planner.plan_desired(&options.targets)?;
        planner.plan_orphans(&options.targets)?;
    }
    let changes = planner.order()?;

    let plan = Plan {
        changes,
        unchanged: planner.unchanged,
        variables: desired.variables().clone(),
        lineage: snapshot.lineage.clone(),
        serial: snapshot.serial,
    };
    tracing::debug!(summary = %plan.summary(), "Computed plan");
    Ok(plan)
}

/// What a resource will look like after apply
#[derive(Debug, Clone, Default)]
struct Projection {
    known: ValueMap,
    unknown: BTreeSet<String>,
    /// Any attribute not in `known` is unknown (new objects)
    open: bool,
}

impl Projection {
    fn existing(record: &ResourceRecord) -> Self {
        Self {
            known: record.outputs(),
            ..Self::default()
        }
    }

    fn fresh(known: ValueMap) -> Self {
        Self {
            known,
            unknown: BTreeSet::new(),
            open: true,
        }
    }

    fn is_unknown(&self, attribute: Option<&str>) -> bool {
        match attribute {
            None => self.open || !self.unknown.is_empty(),
            Some(a) => self.unknown.contains(a) || (self.open && !self.known.contains_key(a)),
        }
    }
}

struct Draft {
    change: Change,
    rank: usize,
}

struct Planner<'a> {
    desired: &'a DesiredState,
    snapshot: &'a StateSnapshot,
    registry: &'a ProviderRegistry,
    projections: BTreeMap<ResourceRef, Projection>,
    replaced: BTreeMap<ResourceRef, Replacement>,
    drafts: Vec<Draft>,
    unchanged: Vec<ResourceRef>,
}

impl<'a> Planner<'a> {
    fn new(
        desired: &'a DesiredState,
        snapshot: &'a StateSnapshot,
        registry: &'a ProviderRegistry,
    ) -> Self {
        Self {
            desired,
            snapshot,
            registry,
            projections: BTreeMap::new(),
            replaced: BTreeMap::new(),
            drafts: Vec::new(),
            unchanged: Vec::new(),
        }
    }

    fn plan_desired(&mut self, targets: &[ResourceRef]) -> Result<()> {
        let selected = if targets.is_empty() {
            None
        } else {
            Some(self.desired.closure(targets)?)
        };

        for resource in self.desired.graph()?.topological_order()? {
            if selected.as_ref().is_some_and(|s| !s.contains(&resource)) {
                let projection = match self.snapshot.get(&resource) {
                    Some(record) => Projection::existing(record),
                    None => Projection::fresh(ValueMap::new()),
                };
                self.projections.insert(resource, projection);
                continue;
            }
            self.plan_resource(&resource)?;
        }
        Ok(())
    }

    fn plan_resource(&mut self, r: &ResourceRef) -> Result<()> {
        let (desired, snapshot) = (self.desired, self.snapshot);
        let Some(resource) = desired.get(r) else {
            return Ok(());
        };
        let schema = self.registry.schema(&resource.resource_type)?;
        let rank = desired.declaration_index(r).unwrap_or_default();
        let depends_on = desired.dependencies_of(r).to_vec();

        let scope = self.scope();
        let mut planned = BTreeMap::new();
        for (key, value) in &resource.attributes {
            if let Some(pv) = self.planned_value(r, value, &scope)? {
                planned.insert(key.clone(), pv);
            }
        }
        let known: ValueMap = planned
            .iter()
            .filter_map(|(k, v)| match v {
                PlannedValue::Known(v) => Some((k.clone(), v.clone())),
                PlannedValue::Unknown => None,
            })
            .collect();

        let mut change = Change::new(ActionType::Create, r.clone());
        change.after = resource.attributes.clone();
        change.depends_on = depends_on.clone();

        let Some(record) = snapshot.get(r) else {
            change.changed_attributes = planned.keys().cloned().collect();
            change.planned = planned;
            self.projections.insert(r.clone(), Projection::fresh(known));
            self.push(change, rank);
            return Ok(());
        };

        let mut changed: BTreeSet<String> = planned
            .iter()
            .filter(|(key, value)| match value {
                PlannedValue::Unknown => true,
                PlannedValue::Known(v) => !record
                    .attributes
                    .get(key.as_str())
                    .is_some_and(|old| values_equal(old, v)),
            })
            .map(|(key, _)| key.clone())
            .collect();
        // Declared last time, gone now
        changed.extend(
            record
                .declared
                .iter()
                .filter(|key| !resource.attributes.contains_key(key.as_str()))
                .cloned(),
        );
        let changed: Vec<String> = changed.into_iter().collect();

        if changed.is_empty() {
            self.projections
                .insert(r.clone(), Projection::existing(record));
            self.unchanged.push(r.clone());
            return Ok(());
        }

        let before = ResolvedAttributes::new(&record.id).with_attributes(record.attributes.clone());
        change.before = Some(before.clone());
        change.changed_attributes = changed.clone();
        change.planned = planned.clone();

        if changed.iter().any(|a| schema.is_immutable(a)) {
            let inherits_destroy_first = depends_on
                .iter()
                .any(|d| self.replaced.get(d) == Some(&Replacement::DestroyBeforeCreate));
            let mode = if schema.destroy_before_create || inherits_destroy_first {
                Replacement::DestroyBeforeCreate
            } else {
                Replacement::CreateBeforeDestroy
            };
            tracing::debug!(resource = %r, ?mode, "Immutable attribute changed, replacing");
            change.replacement = Some(mode);
            let mut delete = Change::delete(r.clone(), before);
            delete.replacement = Some(mode);

            self.replaced.insert(r.clone(), mode);
            self.projections.insert(r.clone(), Projection::fresh(known));
            self.push(change, rank);
            self.push(delete, rank);
            return Ok(());
        }

        change.action = ActionType::Update;
        let mut projection = Projection::existing(record);
        for (key, value) in &planned {
            match value {
                PlannedValue::Known(v) => {
                    projection.known.insert(key.clone(), v.clone());
                }
                PlannedValue::Unknown => {
                    projection.known.remove(key);
                    projection.unknown.insert(key.clone());
                }
            }
        }
        self.projections.insert(r.clone(), projection);
        self.push(change, rank);
        Ok(())
    }

    /// Recorded resources that are no longer declared, then leftover
    /// deposed objects.
    fn plan_orphans(&mut self, targets: &[ResourceRef]) -> Result<()> {
        let (desired, snapshot) = (self.desired, self.snapshot);
        let base = desired.resources().len();
        for (i, (r, record)) in snapshot.resources.iter().enumerate() {
            if desired.contains(r) || (!targets.is_empty() && !targets.contains(r)) {
                continue;
            }
            self.registry.get(&r.resource_type)?;
            self.push(Change::delete(r.clone(), resolved(record)), base + i);
        }
        if targets.is_empty() {
            self.plan_deposed()?;
        }
        Ok(())
    }

    fn plan_destroy(&mut self, targets: &[ResourceRef]) -> Result<()> {
        let selected = if targets.is_empty() {
            None
        } else {
            let graph = self.state_graph()?;
            let mut selected = BTreeSet::new();
            for target in targets {
                if graph.contains(target) {
                    selected.insert(target.clone());
                    selected.extend(graph.transitive_dependents(target)?);
                }
            }
            Some(selected)
        };

        let snapshot = self.snapshot;
        for (i, (r, record)) in snapshot.resources.iter().enumerate() {
            if selected.as_ref().is_some_and(|s| !s.contains(r)) {
                continue;
            }
            self.registry.get(&r.resource_type)?;
            self.push(Change::delete(r.clone(), resolved(record)), i);
        }
        if targets.is_empty() {
            self.plan_deposed()?;
        }
        Ok(())
    }

    fn plan_deposed(&mut self) -> Result<()> {
        let snapshot = self.snapshot;
        let base = self.desired.resources().len() + snapshot.resources.len();
        for (i, object) in snapshot.deposed.iter().enumerate() {
            self.registry.get(&object.resource.resource_type)?;
            let mut change = Change::delete(object.resource.clone(), resolved(&object.record));
            change.deposed = true;
            self.push(change, base + i);
        }
        Ok(())
    }

    fn push(&mut self, change: Change, rank: usize) {
        self.drafts.push(Draft { change, rank });
    }

    /// Expression scope over current projections
    fn scope(&self) -> ValueMap {
        let mut scope = ValueMap::new();
        for (r, projection) in &self.projections {
            let by_name = scope
                .entry(r.resource_type.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(map) = by_name {
                map.insert(
                    r.name.clone(),
                    Value::Object(projection.known.clone().into_iter().collect()),
                );
            }
        }
        scope.insert(
            VAR_ROOT.to_string(),
            Value::Object(self.desired.variables().clone().into_iter().collect()),
        );
        scope
    }

    fn planned_value(
        &self,
        owner: &ResourceRef,
        value: &AttributeValue,
        scope: &ValueMap,
    ) -> Result<Option<PlannedValue>> {
        if value.is_computed() {
            return Ok(None);
        }
        for path in value.references()? {
            let Some(r) = ResourceRef::from_path(&path) else {
                continue;
            };
            let unknown = self
                .projections
                .get(&r)
                .is_none_or(|p| p.is_unknown(path.key_at(2)));
            if unknown {
                return Ok(Some(PlannedValue::Unknown));
            }
        }
        value
            .resolve(scope)
            .map(|v| v.map(PlannedValue::Known))
            .map_err(|e| CloudError::validation(format!("{owner}: {e}")))
    }

    /// Dependency graph of recorded objects
    fn state_graph(&self) -> Result<DependencyGraph<ResourceRef>> {
        let mut graph = DependencyGraph::new();
        for r in self.snapshot.resources.keys() {
            graph.add_node(r.clone());
        }
        for (r, record) in &self.snapshot.resources {
            for dep in &record.depends_on {
                if graph.contains(dep) {
                    graph.add_dependency(r, dep)?;
                }
            }
        }
        Ok(graph)
    }

    /// Sort drafts into execution order and fill in `requires`.
    fn order(&mut self) -> Result<Vec<Change>> {
        let drafts = std::mem::take(&mut self.drafts);
        let labels: Vec<String> = drafts.iter().map(|d| d.change.label()).collect();

        let mut graph = DependencyGraph::new();
        for (draft, label) in drafts.iter().zip(&labels) {
            graph.add_node_ranked(label.clone(), draft.rank);
        }

        let mut writes: BTreeMap<&ResourceRef, usize> = BTreeMap::new();
        let mut deletes: BTreeMap<&ResourceRef, usize> = BTreeMap::new();
        for (i, draft) in drafts.iter().enumerate() {
            match (draft.change.action, draft.change.deposed) {
                (ActionType::Create | ActionType::Update, _) => {
                    writes.insert(&draft.change.resource, i);
                }
                (ActionType::Delete, false) => {
                    deletes.insert(&draft.change.resource, i);
                }
                _ => {}
            }
        }

        let mut edge = |after: usize, before: usize| -> Result<()> {
            graph.add_dependency(&labels[after], &labels[before])?;
            Ok(())
        };

        for (i, draft) in drafts.iter().enumerate() {
            let change = &draft.change;
            match change.action {
                ActionType::Create | ActionType::Update => {
                    for dep in &change.depends_on {
                        if let Some(&j) = writes.get(dep) {
                            edge(i, j)?;
                        }
                    }
                    match change.replacement {
                        Some(Replacement::DestroyBeforeCreate) => {
                            if let Some(&j) = deletes.get(&change.resource) {
                                edge(i, j)?;
                            }
                        }
                        Some(Replacement::CreateBeforeDestroy) => {
                            if let Some(&j) = deletes.get(&change.resource) {
                                edge(j, i)?;
                            }
                        }
                        None => {}
                    }
                    // Stop using an object before it goes away.
                    if let Some(record) = self.snapshot.get(&change.resource) {
                        for old_dep in &record.depends_on {
                            let Some(&j) = deletes.get(old_dep) else {
                                continue;
                            };
                            let destroy_first = drafts[j].change.replacement
                                == Some(Replacement::DestroyBeforeCreate);
                            if !destroy_first {
                                edge(j, i)?;
                            }
                        }
                    }
                }
                ActionType::Delete => {
                    let recorded = self.recorded_dependencies(change);
                    for dep in recorded {
                        if let Some(&j) = deletes.get(dep) {
                            if j != i {
                                edge(j, i)?;
                            }
                        }
                    }
                    if change.replacement == Some(Replacement::CreateBeforeDestroy) {
                        for candidate in self.desired.resources() {
                            let dependent = candidate.reference();
                            if !self
                                .desired
                                .dependencies_of(&dependent)
                                .contains(&change.resource)
                            {
                                continue;
                            }
                            if let Some(&j) = writes.get(&dependent) {
                                edge(i, j)?;
                            }
                        }
                    }
                }
                ActionType::NoOp => {}
            }
        }

        let order = graph.topological_order()?;
        let position: BTreeMap<&String, usize> =
            order.iter().enumerate().map(|(pos, l)| (l, pos)).collect();
        let by_label: BTreeMap<&String, usize> =
            labels.iter().enumerate().map(|(i, l)| (l, i)).collect();

        let mut slots: Vec<Option<Change>> = drafts.into_iter().map(|d| Some(d.change)).collect();
        let mut changes = Vec::with_capacity(order.len());
        for label in &order {
            let Some(change) = by_label.get(label).and_then(|&i| slots[i].take()) else {
                continue;
            };
            let mut requires: Vec<usize> = graph
                .dependencies_of(label)?
                .iter()
                .filter_map(|l| position.get(l).copied())
                .collect();
            requires.sort_unstable();
            changes.push(Change { requires, ..change });
        }
        Ok(changes)
    }

    fn recorded_dependencies<'c>(&'c self, change: &Change) -> &'c [ResourceRef] {
        let id = change.target_id();
        match self.snapshot.get(&change.resource) {
            Some(record) if Some(record.id.as_str()) == id => &record.depends_on,
            _ => self
                .snapshot
                .deposed
                .iter()
                .find(|d| d.resource == change.resource && Some(d.record.id.as_str()) == id)
                .map(|d| d.record.depends_on.as_slice())
                .unwrap_or_default(),
        }
    }
}

fn resolved(record: &ResourceRecord) -> ResolvedAttributes {
    ResolvedAttributes::new(&record.id).with_attributes(record.attributes.clone())
}
