//! Hosts, groups and host patterns

use crate::error::{ConvergeError, Result};
use rigging_core::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Group every host belongs to
pub const ALL: &str = "all";

/// A managed machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub alias: String,

    pub address: String,

    /// Connection parameters: `type` (`ssh` or `local`), `user`, `port`,
    /// `identity_file`
    #[serde(default)]
    pub connection: BTreeMap<String, String>,

    #[serde(default)]
    pub groups: BTreeSet<String>,

    /// Host facts visible to conditions and parameters
    #[serde(default)]
    pub vars: ValueMap,
}

impl Host {
    pub fn new(alias: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            address: address.into(),
            connection: BTreeMap::new(),
            groups: BTreeSet::new(),
            vars: ValueMap::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    pub fn with_connection(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connection.insert(key.into(), value.into());
        self
    }

    pub fn is_local(&self) -> bool {
        self.connection.get("type").map(String::as_str) == Some("local")
    }

    /// `inventory_hostname`-style facts about the host itself
    pub fn facts(&self) -> ValueMap {
        let mut facts = ValueMap::new();
        facts.insert(
            "host".to_string(),
            json!({
                "alias": self.alias,
                "address": self.address,
                "groups": self.groups,
            }),
        );
        facts
    }
}

/// Builds hosts from another engine's outputs, one host per object of a
/// resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSource {
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Attribute holding the address to connect to
    #[serde(default = "default_address_attribute")]
    pub address_attribute: String,

    #[serde(default)]
    pub groups: BTreeSet<String>,

    #[serde(default)]
    pub connection: BTreeMap<String, String>,
}

fn default_address_attribute() -> String {
    "address".to_string()
}

/// Inventory file as written by the user
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryDocument {
    #[serde(default)]
    pub hosts: Vec<Host>,

    #[serde(default)]
    pub from_state: Vec<StateSource>,
}

impl InventoryDocument {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        tracing::debug!(path = %path.display(), "Loaded inventory");
        Self::from_yaml_str(&content)
    }

    /// Resolve `from_state` sources with `outputs`, which maps a resource
    /// type to `name → attributes`.
    pub fn into_inventory<F>(self, mut outputs: F) -> Result<Inventory>
    where
        F: FnMut(&str) -> BTreeMap<String, ValueMap>,
    {
        let mut hosts = self.hosts;
        for source in &self.from_state {
            hosts.extend(hosts_from_outputs(source, &outputs(&source.resource_type))?);
        }
        Inventory::new(hosts)
    }
}

/// Turn recorded resource attributes into hosts
pub fn hosts_from_outputs(
    source: &StateSource,
    outputs: &BTreeMap<String, ValueMap>,
) -> Result<Vec<Host>> {
    if outputs.is_empty() {
        tracing::warn!(resource_type = %source.resource_type, "No recorded objects for host source");
    }
    outputs
        .iter()
        .map(|(name, attributes)| {
            let address = attributes
                .get(&source.address_attribute)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ConvergeError::validation(format!(
                        "{}.{name} has no string attribute '{}'",
                        source.resource_type, source.address_attribute
                    ))
                })?;
            Ok(Host {
                alias: name.clone(),
                address: address.to_string(),
                connection: source.connection.clone(),
                groups: source.groups.clone(),
                vars: attributes.clone(),
            })
        })
        .collect()
}

/// Validated set of hosts in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    hosts: Vec<Host>,
}

impl Inventory {
    pub fn new(hosts: Vec<Host>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for host in &hosts {
            if host.alias.is_empty() || host.alias.contains(':') {
                return Err(ConvergeError::validation(format!(
                    "invalid host alias '{}'",
                    host.alias
                )));
            }
            if !seen.insert(host.alias.as_str()) {
                return Err(ConvergeError::validation(format!(
                    "duplicate host alias '{}'",
                    host.alias
                )));
            }
        }
        Ok(Self { hosts })
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn get(&self, alias: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.alias == alias)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Group names, including the implicit `all`
    pub fn groups(&self) -> BTreeSet<&str> {
        let mut groups: BTreeSet<&str> = self
            .hosts
            .iter()
            .flat_map(|h| h.groups.iter().map(String::as_str))
            .collect();
        groups.insert(ALL);
        groups
    }

    /// Hosts matched by a pattern: `all`, a group, an alias, or a `:`
    /// separated union of those. Results keep inventory order.
    pub fn select(&self, pattern: &str) -> Result<Vec<&Host>> {
        let mut wanted = BTreeSet::new();
        for part in pattern.split(':').map(str::trim) {
            if part.is_empty() {
                return Err(ConvergeError::validation(format!(
                    "empty term in host pattern '{pattern}'"
                )));
            }
            let before = wanted.len();
            let mut known = false;
            for host in &self.hosts {
                if part == ALL || host.alias == part || host.groups.contains(part) {
                    wanted.insert(host.alias.as_str());
                    known = true;
                }
            }
            if !known && !self.groups().contains(part) {
                return Err(ConvergeError::validation(format!(
                    "host pattern '{pattern}' names unknown host or group '{part}'"
                )));
            }
            tracing::trace!(part, added = wanted.len() - before, "Matched host pattern term");
        }
        Ok(self
            .hosts
            .iter()
            .filter(|h| wanted.contains(h.alias.as_str()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> Inventory {
        Inventory::new(vec![
            Host::new("web-1", "10.0.0.1").with_group("web"),
            Host::new("web-2", "10.0.0.2").with_group("web"),
            Host::new("db-1", "10.0.1.1").with_group("db"),
        ])
        .unwrap()
    }

    fn aliases(hosts: Vec<&Host>) -> Vec<&str> {
        hosts.into_iter().map(|h| h.alias.as_str()).collect()
    }

    #[test]
    fn test_select_patterns() {
        let inv = fleet();
        assert_eq!(aliases(inv.select("all").unwrap()), ["web-1", "web-2", "db-1"]);
        assert_eq!(aliases(inv.select("web").unwrap()), ["web-1", "web-2"]);
        assert_eq!(aliases(inv.select("db-1").unwrap()), ["db-1"]);
        assert_eq!(aliases(inv.select("db:web-2").unwrap()), ["web-2", "db-1"]);
        assert_eq!(aliases(inv.select("web:web-1").unwrap()), ["web-1", "web-2"]);
    }

    #[test]
    fn test_select_unknown_term() {
        let err = fleet().select("web:cache").unwrap_err();
        assert!(err.to_string().contains("'cache'"));
        assert!(fleet().select("web::db").is_err());
    }

    #[test]
    fn test_duplicate_alias() {
        let err = Inventory::new(vec![Host::new("a", "1"), Host::new("a", "2")]).unwrap_err();
        assert!(err.to_string().contains("duplicate host alias"));
    }

    #[test]
    fn test_document_with_state_source() {
        let doc = InventoryDocument::from_yaml_str(
            r#"
hosts:
  - alias: bastion
    address: 203.0.113.10
    groups: [edge]
    connection: { type: ssh, user: admin }
from_state:
  - type: instance
    address_attribute: public_ip
    groups: [web]
"#,
        )
        .unwrap();

        let inv = doc
            .into_inventory(|resource_type| {
                assert_eq!(resource_type, "instance");
                let mut outputs = BTreeMap::new();
                let mut attrs = ValueMap::new();
                attrs.insert("public_ip".into(), json!("198.51.100.7"));
                attrs.insert("size".into(), json!("small"));
                outputs.insert("web-1".to_string(), attrs);
                outputs
            })
            .unwrap();

        assert_eq!(inv.len(), 2);
        let web = inv.get("web-1").unwrap();
        assert_eq!(web.address, "198.51.100.7");
        assert_eq!(web.vars["size"], json!("small"));
        assert_eq!(aliases(inv.select("web").unwrap()), ["web-1"]);
        assert_eq!(inv.get("bastion").unwrap().connection["user"], "admin");
    }

    #[test]
    fn test_state_source_missing_address() {
        let source = StateSource {
            resource_type: "instance".into(),
            address_attribute: "public_ip".into(),
            groups: BTreeSet::new(),
            connection: BTreeMap::new(),
        };
        let mut outputs = BTreeMap::new();
        outputs.insert("web-1".to_string(), ValueMap::new());
        let err = hosts_from_outputs(&source, &outputs).unwrap_err();
        assert!(err.to_string().contains("instance.web-1"));
    }
}
