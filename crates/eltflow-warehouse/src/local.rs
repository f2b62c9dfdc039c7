//! Directory-backed object store
//!
//! Each bucket is a directory under the root, and object paths are relative
//! file paths inside it. Used for local runs against files on disk.

use crate::adapter::{ObjectStore, WarehouseError};
use eltflow_core::ObjectRef;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for an object; rejects paths that would leave the bucket
    pub fn resolve(&self, object: &ObjectRef) -> Result<PathBuf, WarehouseError> {
        let mut path = self.root.clone();
        for part in [object.bucket.as_str(), object.path.as_str()] {
            let relative = Path::new(part);
            if part.is_empty()
                || relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(WarehouseError::Config(format!(
                    "object '{}' does not resolve to a path under {}",
                    object.uri(),
                    self.root.display()
                )));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &'static str {
        "Local"
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool, WarehouseError> {
        let path = self.resolve(object)?;
        let found = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .or_else(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Ok(false),
                std::io::ErrorKind::PermissionDenied => {
                    Err(WarehouseError::PermissionDenied(path.display().to_string()))
                }
                _ => Err(WarehouseError::Network(format!("{}: {}", path.display(), e))),
            })?;

        tracing::debug!(object = %object, path = %path.display(), found, "checked local object");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_files_under_bucket_directory() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("medical_global_data")).unwrap();
        std::fs::write(
            root.path().join("medical_global_data/global_health_data.csv"),
            "Country,Year\nUSA,2020\n",
        )
        .unwrap();

        let store = LocalObjectStore::new(root.path());
        assert!(store
            .exists(&ObjectRef::new("medical_global_data", "global_health_data.csv"))
            .await
            .unwrap());
        assert!(!store
            .exists(&ObjectRef::new("medical_global_data", "missing.csv"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn directories_are_not_objects() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("bucket/folder")).unwrap();

        let store = LocalObjectStore::new(root.path());
        assert!(!store.exists(&ObjectRef::new("bucket", "folder")).await.unwrap());
    }

    #[test]
    fn rejects_escaping_paths() {
        let store = LocalObjectStore::new("/data");
        assert!(store.resolve(&ObjectRef::new("bucket", "../secret.csv")).is_err());
        assert!(store.resolve(&ObjectRef::new("..", "x.csv")).is_err());
        assert!(store.resolve(&ObjectRef::new("bucket", "/etc/passwd")).is_err());
        assert_eq!(
            store.resolve(&ObjectRef::new("bucket", "dir/x.csv")).unwrap(),
            PathBuf::from("/data/bucket/dir/x.csv")
        );
    }
}
