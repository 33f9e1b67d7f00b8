//! Desired resources and their attribute values

use crate::error::{CloudError, Result};
use rigging_core::expr::{Expr, PathSegment, VarPath};
use rigging_core::{Template, Value, render_value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Root variable under which document variables are visible to expressions
pub const VAR_ROOT: &str = "var";

/// Identifies a resource as `type.name`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceRef {
    pub resource_type: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// The resource addressed by an expression path (`type.name...`), if
    /// the path addresses a resource at all.
    pub fn from_path(path: &VarPath) -> Option<Self> {
        let resource_type = path.key_at(0)?;
        if resource_type == VAR_ROOT {
            return None;
        }
        let name = path.key_at(1)?;
        Some(Self::new(resource_type, name))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for ResourceRef {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((t, n)) if !t.is_empty() && !n.is_empty() => Ok(Self::new(t, n)),
            _ => Err(CloudError::validation(format!(
                "invalid resource reference '{s}' (expected type.name)"
            ))),
        }
    }
}

impl Serialize for ResourceRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `${type.name.attribute}` pointing at another resource's attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub resource: ResourceRef,
    pub attribute: String,
}

impl AttributeRef {
    /// The expression path `type.name.attribute`.
    pub fn path(&self) -> VarPath {
        VarPath {
            segments: vec![
                PathSegment::Key(self.resource.resource_type.clone()),
                PathSegment::Key(self.resource.name.clone()),
                PathSegment::Key(self.attribute.clone()),
            ],
        }
    }
}

/// Declared value of one attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Fixed value
    Literal(Value),
    /// Another resource's attribute, resolved when this resource is applied
    Reference(AttributeRef),
    /// A value with `${ ... }` templates in it, possibly nested
    Expression(Value),
    /// Only known after the provider has created the resource
    Computed,
}

impl AttributeValue {
    /// Classify a raw document value.
    ///
    /// A string that is exactly `${type.name.attr}` becomes a reference; any
    /// other value with `${` somewhere inside (escaped `$${` included, so the
    /// escape gets rendered) becomes an expression. Every
    /// template is parsed here so syntax errors surface at load time.
    pub fn from_value(value: Value) -> Result<Self> {
        if let Value::String(s) = &value {
            if let Some(reference) = single_reference(s)? {
                return Ok(AttributeValue::Reference(reference));
            }
        }
        if contains_template(&value)? {
            Ok(AttributeValue::Expression(value))
        } else {
            Ok(AttributeValue::Literal(value))
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, AttributeValue::Computed)
    }

    /// Every variable path this value reads.
    pub fn references(&self) -> Result<Vec<VarPath>> {
        match self {
            AttributeValue::Literal(_) | AttributeValue::Computed => Ok(Vec::new()),
            AttributeValue::Reference(r) => Ok(vec![r.path()]),
            AttributeValue::Expression(value) => {
                let mut out = Vec::new();
                collect_references(value, &mut out)?;
                Ok(out)
            }
        }
    }

    /// Variable paths that must be defined for this value to resolve.
    pub fn required_references(&self) -> Result<Vec<VarPath>> {
        match self {
            AttributeValue::Expression(value) => {
                let mut out = Vec::new();
                collect_required(value, &mut out)?;
                Ok(out)
            }
            _ => self.references(),
        }
    }

    /// Resources this value reads from.
    pub fn resource_refs(&self) -> Result<Vec<ResourceRef>> {
        Ok(self
            .references()?
            .iter()
            .filter_map(ResourceRef::from_path)
            .collect())
    }

    /// Evaluate against a scope of resource attributes and variables.
    /// Returns `None` for computed attributes.
    pub fn resolve(&self, scope: &dyn rigging_core::Scope) -> Result<Option<Value>> {
        match self {
            AttributeValue::Literal(v) => Ok(Some(v.clone())),
            AttributeValue::Computed => Ok(None),
            AttributeValue::Reference(r) => Ok(Some(rigging_core::expr::evaluate(
                &Expr::Var(r.path()),
                scope,
            )?)),
            AttributeValue::Expression(v) => Ok(Some(render_value(v, scope)?)),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Literal(v) | AttributeValue::Expression(v) => write!(f, "{v}"),
            AttributeValue::Reference(r) => write!(f, "${{{}.{}}}", r.resource, r.attribute),
            AttributeValue::Computed => write!(f, "(computed)"),
        }
    }
}

fn single_reference(s: &str) -> Result<Option<AttributeRef>> {
    if !s.contains("${") {
        return Ok(None);
    }
    let template = Template::parse(s)?;
    let Some(path) = template.single_expr().and_then(Expr::as_path) else {
        return Ok(None);
    };
    if path.len() != 3 {
        return Ok(None);
    }
    let (Some(resource), Some(attribute)) = (ResourceRef::from_path(path), path.key_at(2)) else {
        return Ok(None);
    };
    Ok(Some(AttributeRef {
        resource,
        attribute: attribute.to_string(),
    }))
}

fn contains_template(value: &Value) -> Result<bool> {
    match value {
        Value::String(s) if s.contains("${") => {
            Template::parse(s.as_str())?;
            Ok(true)
        }
        Value::Array(items) => {
            for item in items {
                if contains_template(item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Object(map) => {
            for item in map.values() {
                if contains_template(item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

fn collect_references(value: &Value, out: &mut Vec<VarPath>) -> Result<()> {
    walk_templates(value, &mut |t| out.extend(t.references().into_iter().cloned()))
}

fn collect_required(value: &Value, out: &mut Vec<VarPath>) -> Result<()> {
    walk_templates(value, &mut |t| {
        out.extend(t.required_references().into_iter().cloned())
    })
}

fn walk_templates(value: &Value, visit: &mut dyn FnMut(&Template)) -> Result<()> {
    match value {
        Value::String(s) if s.contains("${") => {
            let template = Template::parse(s.as_str())?;
            visit(&template);
        }
        Value::Array(items) => {
            for item in items {
                walk_templates(item, visit)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                walk_templates(item, visit)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// A desired infrastructure object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Unique within the type
    pub name: String,

    /// Explicit dependencies; references add implicit ones
    #[serde(default)]
    pub depends_on: Vec<ResourceRef>,

    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            depends_on: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_literal(self, key: impl Into<String>, value: Value) -> Self {
        self.with_attribute(key, AttributeValue::Literal(value))
    }

    pub fn depends_on(mut self, dependency: ResourceRef) -> Self {
        self.depends_on.push(dependency);
        self
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.resource_type, &self.name)
    }

    /// Explicit plus implicit dependencies, deduplicated, first mention first.
    pub fn all_dependencies(&self) -> Result<Vec<ResourceRef>> {
        let mut deps = self.depends_on.clone();
        for value in self.attributes.values() {
            for r in value.resource_refs()? {
                if !deps.contains(&r) {
                    deps.push(r);
                }
            }
        }
        Ok(deps)
    }
}
