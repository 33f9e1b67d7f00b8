//! Resource provider trait definition

use crate::error::{CloudError, Result};
use crate::resource::ResourceRef;
use async_trait::async_trait;
use rigging_core::ValueMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resource provider abstraction trait
///
/// A provider owns one or more resource types and performs the actual
/// create/update/delete calls against the outside world. Providers must be
/// safe to call concurrently for different resources.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Returns the provider name (e.g., "local")
    fn name(&self) -> &str;

    /// Resource types handled by this provider
    fn resource_types(&self) -> Vec<String>;

    /// Schema of a resource type
    fn schema(&self, resource_type: &str) -> ResourceSchema {
        let _ = resource_type;
        ResourceSchema::default()
    }

    /// Observe the real object behind a recorded resource.
    /// `Ok(None)` means it no longer exists.
    async fn describe(&self, resource: &ResourceRef, id: &str)
    -> Result<Option<ResolvedAttributes>>;

    /// Create an object and return its attributes
    async fn create(&self, resource_type: &str, attributes: &ValueMap)
    -> Result<ResolvedAttributes>;

    /// Update an object in place and return its attributes
    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &ValueMap,
    ) -> Result<ResolvedAttributes>;

    /// Delete an object
    async fn delete(&self, resource_type: &str, id: &str) -> Result<()>;
}

/// Per-type rules a provider declares to the planner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Attributes that cannot be changed in place; a change forces replacement
    #[serde(default)]
    pub immutable: Vec<String>,

    /// Replace by deleting the old object first (e.g. fixed unique names)
    #[serde(default)]
    pub destroy_before_create: bool,
}

impl ResourceSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn immutable<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immutable.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn destroy_before_create(mut self) -> Self {
        self.destroy_before_create = true;
        self
    }

    pub fn is_immutable(&self, attribute: &str) -> bool {
        self.immutable.iter().any(|a| a == attribute)
    }
}

/// Attributes of a real object as reported by its provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAttributes {
    /// Provider-specific object ID
    pub id: String,

    #[serde(default)]
    pub attributes: ValueMap,
}

impl ResolvedAttributes {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: ValueMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: ValueMap) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Resource type → provider lookup
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for every type it declares. Later registrations
    /// win for overlapping types.
    pub fn register(&mut self, provider: Arc<dyn ResourceProvider>) {
        for resource_type in provider.resource_types() {
            tracing::debug!(
                provider = provider.name(),
                resource_type = %resource_type,
                "Registered resource type"
            );
            self.providers.insert(resource_type, provider.clone());
        }
    }

    pub fn with(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, resource_type: &str) -> Result<Arc<dyn ResourceProvider>> {
        self.providers.get(resource_type).cloned().ok_or_else(|| {
            CloudError::validation(format!("no provider for resource type '{resource_type}'"))
        })
    }

    pub fn schema(&self, resource_type: &str) -> Result<ResourceSchema> {
        Ok(self.get(resource_type)?.schema(resource_type))
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("resource_types", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
