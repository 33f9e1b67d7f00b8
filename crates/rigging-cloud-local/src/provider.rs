//! Local filesystem provider implementation

use crate::error::{LocalError, Result};
use async_trait::async_trait;
use rigging_cloud::{ResolvedAttributes, ResourceProvider, ResourceRef, ResourceSchema};
use rigging_core::{Value, ValueMap};
use serde_json::json;
use std::path::{Path, PathBuf};

pub const LOCAL_FILE: &str = "local_file";
pub const LOCAL_DIRECTORY: &str = "local_directory";

/// Provider for files and directories on this machine
///
/// Object IDs are the declared `path`, so a state file stays valid when the
/// provider root is the same on the next run.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    async fn write_file(&self, attributes: &ValueMap) -> Result<ResolvedAttributes> {
        let declared = required_str(LOCAL_FILE, attributes, "path")?;
        let content = optional_str(attributes, "content")?.unwrap_or_default();
        let mode = parse_mode(attributes.get("mode"))?;
        let path = self.resolve(declared);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LocalError::io(parent, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| LocalError::io(&path, e))?;
        if let Some(mode) = mode {
            set_mode(&path, mode).await?;
        }

        tracing::info!(path = %path.display(), bytes = content.len(), "Wrote file");
        Ok(ResolvedAttributes::new(declared)
            .with_attributes(attributes.clone())
            .with_attribute("size", json!(content.len())))
    }

    async fn make_directory(&self, attributes: &ValueMap) -> Result<ResolvedAttributes> {
        let declared = required_str(LOCAL_DIRECTORY, attributes, "path")?;
        let mode = parse_mode(attributes.get("mode"))?;
        let path = self.resolve(declared);

        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| LocalError::io(&path, e))?;
        if let Some(mode) = mode {
            set_mode(&path, mode).await?;
        }

        tracing::info!(path = %path.display(), "Created directory");
        Ok(ResolvedAttributes::new(declared).with_attributes(attributes.clone()))
    }

    async fn read_file(&self, id: &str) -> Result<Option<ResolvedAttributes>> {
        let path = self.resolve(id);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LocalError::io(&path, e)),
        };
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| LocalError::io(&path, e))?;

        let mut found = ResolvedAttributes::new(id)
            .with_attribute("path", json!(id))
            .with_attribute("size", json!(content.len()))
            .with_attribute("content", json!(content));
        if let Some(mode) = mode_of(&metadata) {
            found = found.with_attribute("mode", json!(mode));
        }
        Ok(Some(found))
    }

    async fn read_directory(&self, id: &str) -> Result<Option<ResolvedAttributes>> {
        let path = self.resolve(id);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_dir() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LocalError::io(&path, e)),
        };

        let mut found = ResolvedAttributes::new(id).with_attribute("path", json!(id));
        if let Some(mode) = mode_of(&metadata) {
            found = found.with_attribute("mode", json!(mode));
        }
        Ok(Some(found))
    }

    async fn remove(&self, resource_type: &str, id: &str) -> Result<()> {
        let path = self.resolve(id);
        let removed = match resource_type {
            LOCAL_FILE => tokio::fs::remove_file(&path).await,
            LOCAL_DIRECTORY => tokio::fs::remove_dir(&path).await,
            other => return Err(LocalError::UnsupportedType(other.to_string())),
        };
        match removed {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Already gone");
                Ok(())
            }
            Err(e) => Err(LocalError::io(&path, e)),
        }
    }
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn resource_types(&self) -> Vec<String> {
        vec![LOCAL_FILE.to_string(), LOCAL_DIRECTORY.to_string()]
    }

    fn schema(&self, _resource_type: &str) -> ResourceSchema {
        ResourceSchema::new().immutable(["path"])
    }

    async fn describe(
        &self,
        resource: &ResourceRef,
        id: &str,
    ) -> rigging_cloud::Result<Option<ResolvedAttributes>> {
        let found = match resource.resource_type.as_str() {
            LOCAL_FILE => self.read_file(id).await?,
            LOCAL_DIRECTORY => self.read_directory(id).await?,
            other => return Err(LocalError::UnsupportedType(other.to_string()).into()),
        };
        Ok(found)
    }

    async fn create(
        &self,
        resource_type: &str,
        attributes: &ValueMap,
    ) -> rigging_cloud::Result<ResolvedAttributes> {
        let created = match resource_type {
            LOCAL_FILE => self.write_file(attributes).await?,
            LOCAL_DIRECTORY => self.make_directory(attributes).await?,
            other => return Err(LocalError::UnsupportedType(other.to_string()).into()),
        };
        Ok(created)
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &ValueMap,
    ) -> rigging_cloud::Result<ResolvedAttributes> {
        // `path` is immutable, so the object keeps its id.
        let mut updated = match resource_type {
            LOCAL_FILE => self.write_file(attributes).await?,
            LOCAL_DIRECTORY => self.make_directory(attributes).await?,
            other => return Err(LocalError::UnsupportedType(other.to_string()).into()),
        };
        updated.id = id.to_string();
        Ok(updated)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> rigging_cloud::Result<()> {
        Ok(self.remove(resource_type, id).await?)
    }
}

fn required_str<'a>(resource_type: &str, attributes: &'a ValueMap, key: &str) -> Result<&'a str> {
    match optional_str(attributes, key)? {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(LocalError::MissingAttribute {
            resource_type: resource_type.to_string(),
            attribute: key.to_string(),
        }),
    }
}

fn optional_str<'a>(attributes: &'a ValueMap, key: &str) -> Result<Option<&'a str>> {
    match attributes.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(LocalError::InvalidAttribute {
            attribute: key.to_string(),
            message: format!("expected a string, got {other}"),
        }),
    }
}

/// Permission bits written as four octal digits, e.g. "0644"
fn parse_mode(value: Option<&Value>) -> Result<Option<u32>> {
    let invalid = |message: String| LocalError::InvalidAttribute {
        attribute: "mode".to_string(),
        message,
    };
    let s = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s,
        Some(other) => return Err(invalid(format!("expected a string like \"0644\", got {other}"))),
    };
    if s.len() != 4 {
        return Err(invalid(format!("expected four octal digits, got \"{s}\"")));
    }
    u32::from_str_radix(s, 8)
        .map(Some)
        .map_err(|_| invalid(format!("\"{s}\" is not octal")))
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| LocalError::io(path, e))
}

#[cfg(not(unix))]
async fn set_mode(path: &Path, _mode: u32) -> Result<()> {
    tracing::warn!(path = %path.display(), "File modes are not supported on this platform");
    Ok(())
}

#[cfg(unix)]
fn mode_of(metadata: &std::fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:04o}", metadata.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn mode_of(_metadata: &std::fs::Metadata) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn attrs(pairs: &[(&str, &str)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[tokio::test]
    async fn test_file_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        let r = ResourceRef::new(LOCAL_FILE, "motd");

        let created = tokio_test::assert_ok!(
            provider
                .create(LOCAL_FILE, &attrs(&[("path", "etc/motd"), ("content", "hello\n")]))
                .await
        );
        assert_eq!(created.id, "etc/motd");
        assert_eq!(created.attributes["size"], json!(6));
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("etc/motd")).unwrap(),
            "hello\n"
        );

        let updated = provider
            .update(
                LOCAL_FILE,
                "etc/motd",
                &attrs(&[("path", "etc/motd"), ("content", "bye\n")]),
            )
            .await
            .unwrap();
        assert_eq!(updated.id, "etc/motd");
        let found = provider.describe(&r, "etc/motd").await.unwrap().unwrap();
        assert_eq!(found.attributes["content"], json!("bye\n"));

        provider.delete(LOCAL_FILE, "etc/motd").await.unwrap();
        assert!(provider.describe(&r, "etc/motd").await.unwrap().is_none());
        // Deleting twice is not an error
        provider.delete(LOCAL_FILE, "etc/motd").await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        let r = ResourceRef::new(LOCAL_DIRECTORY, "data");

        provider
            .create(LOCAL_DIRECTORY, &attrs(&[("path", "srv/data")]))
            .await
            .unwrap();
        assert!(tmp.path().join("srv/data").is_dir());
        assert!(provider.describe(&r, "srv/data").await.unwrap().is_some());

        // A file is not a directory
        std::fs::write(tmp.path().join("plain"), "x").unwrap();
        assert!(provider.describe(&r, "plain").await.unwrap().is_none());

        provider.delete(LOCAL_DIRECTORY, "srv/data").await.unwrap();
        assert!(!tmp.path().join("srv/data").exists());
    }

    #[tokio::test]
    async fn test_non_empty_directory_delete_fails() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        std::fs::create_dir(tmp.path().join("full")).unwrap();
        std::fs::write(tmp.path().join("full/keep"), "x").unwrap();

        let err = provider.delete(LOCAL_DIRECTORY, "full").await.unwrap_err();
        assert!(matches!(err, rigging_cloud::CloudError::Provider(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        provider
            .create(
                LOCAL_FILE,
                &attrs(&[("path", "secret"), ("content", "s3cr3t"), ("mode", "0600")]),
            )
            .await
            .unwrap();

        let mode = std::fs::metadata(tmp.path().join("secret"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        let found = provider
            .describe(&ResourceRef::new(LOCAL_FILE, "secret"), "secret")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.attributes["mode"], json!("0600"));
    }

    #[tokio::test]
    async fn test_invalid_attributes() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());

        let err = provider
            .create(LOCAL_FILE, &attrs(&[("content", "x")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing attribute 'path'"));

        let err = provider
            .create(LOCAL_FILE, &attrs(&[("path", "f"), ("mode", "644")]))
            .await
            .unwrap_err();
        assert!(matches!(err, rigging_cloud::CloudError::Validation(_)));

        let err = provider
            .create(LOCAL_FILE, &attrs(&[("path", "f"), ("mode", "0999")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not octal"));

        let err = provider.create("local_link", &attrs(&[])).await.unwrap_err();
        assert!(err.to_string().contains("local_link"));
    }

    #[test]
    fn test_absolute_paths_ignore_root() {
        let provider = LocalProvider::new("/srv/root");
        assert_eq!(provider.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
        assert_eq!(provider.resolve("app.conf"), PathBuf::from("/srv/root/app.conf"));
    }
}
