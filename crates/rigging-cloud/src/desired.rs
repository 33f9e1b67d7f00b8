//! Desired-state documents
//!
//! ```yaml
//! variables:
//!   site: example
//! resources:
//!   - type: local_directory
//!     name: site
//!     attributes:
//!       path: /srv/${var.site}
//!   - type: local_file
//!     name: index
//!     attributes:
//!       path: ${local_directory.site.path}/index.html
//!       content: hello
//!       checksum: !computed
//! ```

use crate::error::{CloudError, Result};
use crate::resource::{AttributeValue, Resource, ResourceRef, VAR_ROOT};
use rigging_core::{DependencyGraph, Value, ValueMap};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const COMPUTED_TAG: &str = "computed";

/// A validated set of desired resources
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    variables: ValueMap,
    resources: Vec<Resource>,
    index: BTreeMap<ResourceRef, usize>,
    dependencies: BTreeMap<ResourceRef, Vec<ResourceRef>>,
}

impl DesiredState {
    /// Validate resources: unique names, known dependencies, parseable
    /// templates, defined variables and an acyclic graph.
    pub fn new(variables: ValueMap, resources: Vec<Resource>) -> Result<Self> {
        let mut index = BTreeMap::new();
        for (i, resource) in resources.iter().enumerate() {
            if resource.resource_type == VAR_ROOT {
                return Err(CloudError::validation(format!(
                    "'{VAR_ROOT}' is reserved and cannot be used as a resource type"
                )));
            }
            if index.insert(resource.reference(), i).is_some() {
                return Err(CloudError::validation(format!(
                    "duplicate resource {}",
                    resource.reference()
                )));
            }
        }

        let mut dependencies = BTreeMap::new();
        for resource in &resources {
            let me = resource.reference();
            for value in resource.attributes.values() {
                for path in value.required_references()? {
                    let name = path.key_at(1).unwrap_or_default();
                    if path.root() == VAR_ROOT && !variables.contains_key(name) {
                        return Err(CloudError::validation(format!(
                            "{me} uses undefined variable '{path}'"
                        )));
                    }
                }
                for path in value.references()? {
                    if path.root() != VAR_ROOT && ResourceRef::from_path(&path).is_none() {
                        return Err(CloudError::validation(format!(
                            "{me}: '{path}' does not address a resource (expected type.name.attribute)"
                        )));
                    }
                }
            }
            let deps = resource.all_dependencies()?;
            for dep in &deps {
                if !index.contains_key(dep) {
                    return Err(CloudError::validation(format!(
                        "{me} depends on undeclared resource {dep}"
                    )));
                }
            }
            dependencies.insert(me, deps);
        }

        let state = Self {
            variables,
            resources,
            index,
            dependencies,
        };
        state.graph()?.check_acyclic()?;
        Ok(state)
    }

    /// Parse a YAML (or JSON) desired-state document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let doc: DesiredDocument = serde_yaml::from_str(content)
            .map_err(|e| CloudError::validation(format!("invalid desired-state document: {e}")))?;
        doc.into_state()
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        tracing::debug!("Loaded desired state from {}", path.display());
        Self::from_yaml_str(&content)
    }

    pub fn variables(&self) -> &ValueMap {
        &self.variables
    }

    /// Resources in declaration order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn get(&self, resource: &ResourceRef) -> Option<&Resource> {
        self.index.get(resource).map(|i| &self.resources[*i])
    }

    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.index.contains_key(resource)
    }

    /// Position in the document
    pub fn declaration_index(&self, resource: &ResourceRef) -> Option<usize> {
        self.index.get(resource).copied()
    }

    /// Explicit and implicit dependencies of a resource
    pub fn dependencies_of(&self, resource: &ResourceRef) -> &[ResourceRef] {
        self.dependencies
            .get(resource)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Dependency graph ranked by declaration order
    pub fn graph(&self) -> Result<DependencyGraph<ResourceRef>> {
        let mut graph = DependencyGraph::new();
        for resource in &self.resources {
            graph.add_node(resource.reference());
        }
        for (resource, deps) in &self.dependencies {
            for dep in deps {
                graph.add_dependency(resource, dep)?;
            }
        }
        Ok(graph)
    }

    /// `targets` plus everything they depend on
    pub fn closure(&self, targets: &[ResourceRef]) -> Result<BTreeSet<ResourceRef>> {
        let graph = self.graph()?;
        let mut selected = BTreeSet::new();
        for target in targets {
            if !self.contains(target) {
                continue;
            }
            selected.insert(target.clone());
            selected.extend(graph.transitive_dependencies(target)?);
        }
        Ok(selected)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DesiredDocument {
    #[serde(default)]
    variables: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    resources: Vec<ResourceDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceDocument {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    depends_on: Vec<ResourceRef>,
    #[serde(default)]
    attributes: BTreeMap<String, serde_yaml::Value>,
}

impl DesiredDocument {
    fn into_state(self) -> Result<DesiredState> {
        let variables = self
            .variables
            .into_iter()
            .map(|(k, v)| Ok((k, yaml_to_json(v)?)))
            .collect::<Result<ValueMap>>()?;

        let mut resources = Vec::with_capacity(self.resources.len());
        for doc in self.resources {
            let mut resource = Resource::new(doc.resource_type, doc.name);
            resource.depends_on = doc.depends_on;
            for (key, raw) in doc.attributes {
                let value = match raw {
                    serde_yaml::Value::Tagged(tagged) if tagged.tag == COMPUTED_TAG => {
                        AttributeValue::Computed
                    }
                    other => AttributeValue::from_value(yaml_to_json(other)?)?,
                };
                resource.attributes.insert(key, value);
            }
            resources.push(resource);
        }
        DesiredState::new(variables, resources)
    }
}

fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    use serde_yaml::Value as Yaml;
    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| CloudError::validation(format!("unsupported number {n}")))?
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Yaml::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                match k {
                    Yaml::String(key) => {
                        out.insert(key, yaml_to_json(v)?);
                    }
                    other => {
                        return Err(CloudError::validation(format!(
                            "mapping keys must be strings, got {other:?}"
                        )));
                    }
                }
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => {
            return Err(CloudError::validation(format!(
                "unsupported tag {} (only !{COMPUTED_TAG} on attributes)",
                tagged.tag
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NETWORK: &str = r#"
variables:
  cidr: 10.0.0.0/16
resources:
  - type: vpc
    name: main
    attributes:
      cidr: ${var.cidr}
      arn: !computed
  - type: subnet
    name: a
    attributes:
      vpc_id: ${vpc.main.id}
      zone: is1a
  - type: instance
    name: web
    depends_on: [subnet.a]
    attributes:
      size: small
      ports: [80, 443]
"#;

    #[test]
    fn test_parse_document() {
        let desired = DesiredState::from_yaml_str(NETWORK).unwrap();
        assert_eq!(desired.resources().len(), 3);
        assert_eq!(desired.variables()["cidr"], json!("10.0.0.0/16"));

        let vpc = desired.get(&ResourceRef::new("vpc", "main")).unwrap();
        assert!(vpc.attributes["arn"].is_computed());
        assert!(matches!(
            vpc.attributes["cidr"],
            AttributeValue::Expression(_)
        ));

        let subnet = ResourceRef::new("subnet", "a");
        assert_eq!(
            desired.dependencies_of(&subnet),
            &[ResourceRef::new("vpc", "main")]
        );
        let web = desired.get(&ResourceRef::new("instance", "web")).unwrap();
        assert_eq!(
            web.attributes["ports"],
            AttributeValue::Literal(json!([80, 443]))
        );
    }

    #[test]
    fn test_closure_includes_dependencies() {
        let desired = DesiredState::from_yaml_str(NETWORK).unwrap();
        let closure = desired
            .closure(&[ResourceRef::new("instance", "web")])
            .unwrap();
        assert_eq!(closure.len(), 3);
        let closure = desired.closure(&[ResourceRef::new("vpc", "main")]).unwrap();
        assert_eq!(closure.len(), 1);
    }

    #[test]
    fn test_cycle_is_validation_error() {
        let doc = r#"
resources:
  - type: a
    name: x
    attributes: { v: "${b.y.id}" }
  - type: b
    name: y
    depends_on: [a.x]
"#;
        let err = DesiredState::from_yaml_str(doc).unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn test_undeclared_dependency() {
        let doc = r#"
resources:
  - type: subnet
    name: a
    attributes: { vpc_id: "${vpc.missing.id}" }
"#;
        assert!(matches!(
            DesiredState::from_yaml_str(doc),
            Err(CloudError::Validation(_))
        ));
    }

    #[test]
    fn test_undefined_variable() {
        let doc = r#"
resources:
  - type: vpc
    name: main
    attributes: { cidr: "${var.nope}" }
"#;
        let err = DesiredState::from_yaml_str(doc).unwrap_err();
        assert!(err.to_string().contains("undefined variable"), "{err}");
    }

    #[test]
    fn test_defaulted_variable_may_be_undefined() {
        let doc = r#"
resources:
  - type: vpc
    name: main
    attributes: { cidr: "${var.cidr | default('10.0.0.0/16')}" }
"#;
        let desired = DesiredState::from_yaml_str(doc).unwrap();
        let vpc = desired.get(&ResourceRef::new("vpc", "main")).unwrap();
        let scope = crate::state::StateSnapshot::new().scope(desired.variables());
        assert_eq!(
            vpc.attributes["cidr"].resolve(&scope).unwrap(),
            Some(json!("10.0.0.0/16"))
        );

        // The fallback itself still has to be defined
        let doc = r#"
resources:
  - type: vpc
    name: main
    attributes: { cidr: "${var.cidr | default(var.fallback)}" }
"#;
        let err = DesiredState::from_yaml_str(doc).unwrap_err();
        assert!(err.to_string().contains("var.fallback"), "{err}");
    }

    #[test]
    fn test_duplicate_resource() {
        let doc = r#"
resources:
  - { type: vpc, name: main }
  - { type: vpc, name: main }
"#;
        assert!(DesiredState::from_yaml_str(doc).is_err());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let doc = r#"
resources:
  - type: vpc
    name: main
    attributes: { cidr: !secret abc }
"#;
        assert!(DesiredState::from_yaml_str(doc).is_err());
    }
}
