//! State snapshot management
//!
//! The snapshot records every object the reconciliation engine created, keyed
//! by `type.name`. It is read at plan time and rewritten after each applied
//! change. The file store writes a temporary file, syncs it and renames it
//! over the old one, so an interrupted write never leaves a torn file.

use crate::error::{CloudError, Result};
use crate::resource::{ResourceRef, VAR_ROOT};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rigging_core::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Current state document version
pub const STATE_VERSION: u32 = 1;

/// Durable record of provisioned resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State document version
    pub version: u32,

    /// Incremented on every write
    pub serial: u64,

    /// Identity of this state history; never changes after creation
    pub lineage: String,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Current objects
    #[serde(default)]
    pub resources: BTreeMap<ResourceRef, ResourceRecord>,

    /// Objects replaced create-before-destroy whose deletion is still pending
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<DeposedObject>,

    /// Fields written by newer tools, kept as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
            deposed: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.deposed.is_empty()
    }

    pub fn get(&self, resource: &ResourceRef) -> Option<&ResourceRecord> {
        self.resources.get(resource)
    }

    pub fn insert(&mut self, resource: ResourceRef, record: ResourceRecord) {
        self.resources.insert(resource, record);
    }

    pub fn remove(&mut self, resource: &ResourceRef) -> Option<ResourceRecord> {
        self.resources.remove(resource)
    }

    /// Move the current object of `resource` to the deposed list.
    pub fn depose(&mut self, resource: &ResourceRef) -> bool {
        match self.resources.remove(resource) {
            Some(record) => {
                self.deposed.push(DeposedObject {
                    resource: resource.clone(),
                    record,
                });
                true
            }
            None => false,
        }
    }

    /// Forget the object with provider ID `id`, whether current or deposed.
    pub fn remove_object(&mut self, resource: &ResourceRef, id: &str) -> bool {
        if self.resources.get(resource).is_some_and(|r| r.id == id) {
            self.resources.remove(resource);
            return true;
        }
        let before = self.deposed.len();
        self.deposed
            .retain(|d| !(d.resource == *resource && d.record.id == id));
        self.deposed.len() != before
    }

    /// Record a write: bump the serial and timestamp.
    pub fn touch(&mut self) {
        self.serial += 1;
        self.updated_at = Utc::now();
    }

    /// Attributes (plus `id`) of every resource of one type, by name.
    ///
    /// This is the plain mapping handed to the convergence inventory.
    pub fn outputs_of_type(&self, resource_type: &str) -> BTreeMap<String, ValueMap> {
        self.resources
            .iter()
            .filter(|(r, _)| r.resource_type == resource_type)
            .map(|(r, record)| (r.name.clone(), record.outputs()))
            .collect()
    }

    /// Expression scope: `type.name.attr` for every resource plus `var.*`.
    pub fn scope(&self, variables: &ValueMap) -> ValueMap {
        let mut scope = ValueMap::new();
        for (r, record) in &self.resources {
            let by_name = scope
                .entry(r.resource_type.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(map) = by_name {
                map.insert(
                    r.name.clone(),
                    Value::Object(record.outputs().into_iter().collect()),
                );
            }
        }
        scope.insert(
            VAR_ROOT.to_string(),
            Value::Object(variables.clone().into_iter().collect()),
        );
        scope
    }
}

/// One recorded object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Provider-specific object ID
    pub id: String,

    /// Last known attributes
    #[serde(default)]
    pub attributes: ValueMap,

    /// Dependencies at the time of the last write; used to order deletes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceRef>,

    /// Attribute names the desired state declared at the last write, so a
    /// later plan can tell a dropped declaration from a provider output
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub declared: BTreeSet<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ResourceRecord {
    pub fn new(id: impl Into<String>, attributes: ValueMap) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            attributes,
            depends_on: Vec::new(),
            declared: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_dependencies(mut self, depends_on: Vec<ResourceRef>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_declared<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared = names.into_iter().map(Into::into).collect();
        self
    }

    /// Attributes with `id` added.
    pub fn outputs(&self) -> ValueMap {
        let mut out = self.attributes.clone();
        out.insert("id".to_string(), Value::String(self.id.clone()));
        out
    }
}

/// An object waiting for deletion after its replacement was created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeposedObject {
    pub resource: ResourceRef,
    pub record: ResourceRecord,
}

/// Parse a state document, migrating older versions forward.
pub fn parse_snapshot(content: &str) -> Result<StateSnapshot> {
    let doc: Value = serde_json::from_str(content)
        .map_err(|e| CloudError::StateCorruption(format!("not valid JSON: {e}")))?;
    migrate(doc)
}

fn migrate(mut doc: Value) -> Result<StateSnapshot> {
    let Value::Object(map) = &mut doc else {
        return Err(CloudError::StateCorruption(
            "state document is not an object".to_string(),
        ));
    };

    let version = match map.get("version") {
        None => 0,
        Some(v) => v.as_u64().ok_or_else(|| {
            CloudError::StateCorruption(format!("invalid version field: {v}"))
        })?,
    };
    if version > u64::from(STATE_VERSION) {
        return Err(CloudError::StateCorruption(format!(
            "state version {version} is newer than supported version {STATE_VERSION}"
        )));
    }

    if version == 0 {
        // Version 0 predates serial and lineage.
        tracing::debug!("Migrating state document from version 0");
        map.insert("version".into(), Value::from(STATE_VERSION));
        map.entry("serial").or_insert_with(|| Value::from(0));
        map.entry("lineage")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        map.entry("updated_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    }

    serde_json::from_value(doc).map_err(|e| CloudError::StateCorruption(e.to_string()))
}

/// Where snapshots are persisted
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the snapshot; a store with nothing in it yields a fresh one
    async fn load(&self) -> Result<StateSnapshot>;

    /// Persist the snapshot atomically
    async fn save(&self, snapshot: &StateSnapshot) -> Result<()>;
}

/// JSON file store with atomic replace and a `.backup` of the previous write
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the backup file path
    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".backup")
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    async fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !fs::try_exists(dir).await? {
                fs::create_dir_all(dir).await?;
                tracing::debug!("Created state directory: {}", dir.display());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        if !fs::try_exists(&self.path).await? {
            tracing::debug!("State file not found, returning empty state");
            return Ok(StateSnapshot::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let snapshot = parse_snapshot(&content)?;

        tracing::debug!(
            serial = snapshot.serial,
            "Loaded state with {} resources",
            snapshot.resources.len()
        );
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.ensure_parent_dir().await?;

        let content = serde_json::to_string_pretty(snapshot)?;
        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if fs::try_exists(&self.path).await? {
            fs::copy(&self.path, self.backup_path()).await?;
        }
        fs::rename(&temp, &self.path).await?;

        tracing::debug!(
            serial = snapshot.serial,
            "Saved state with {} resources",
            snapshot.resources.len()
        );
        Ok(())
    }
}

/// In-process store, mostly for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshot: Option<StateSnapshot>,
    saves: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                snapshot: Some(snapshot),
                saves: 0,
            }),
        }
    }

    /// The last saved snapshot, if any
    pub fn snapshot(&self) -> Option<StateSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot
            .clone()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).saves
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        Ok(self.snapshot().unwrap_or_default())
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.snapshot = Some(snapshot.clone());
        inner.saves += 1;
        Ok(())
    }
}
