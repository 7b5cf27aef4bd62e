//! JSON snapshot store under `<directory>/pickles/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::collab::Artifact;
use crate::error::BoxError;

/// Subdirectory holding persisted snapshots.
pub const PICKLE_DIR: &str = "pickles";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot `{name}`: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot {path} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Writes named snapshots atomically (temp file, then rename).
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `<directory>/pickles`.
    pub fn new(directory: &Path) -> Self {
        Self {
            root: directory.join(PICKLE_DIR),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    /// Serialize `value` and replace the snapshot called `name`.
    pub async fn dump<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, PersistError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Encode {
            name: name.to_string(),
            source,
        })?;

        let path = self.path_for(name);
        let tmp = self.root.join(format!(".{}.json.tmp", name));
        let write_err = |source| PersistError::Write {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(write_err)?;
        tokio::fs::write(&tmp, &bytes).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(write_err)?;

        tracing::debug!(artifact = name, path = %path.display(), bytes = bytes.len(), "Snapshot written");
        Ok(path)
    }

    /// Read a snapshot back. A missing file is `Ok(None)`.
    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistError> {
        let path = self.path_for(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PersistError::Read { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistError::Decode { path, source })
    }
}

type Snapshot = Box<dyn Fn() -> Result<serde_json::Value, BoxError> + Send + Sync>;

/// Artifact whose content is taken from a closure at persist time.
pub struct JsonArtifact {
    name: String,
    store: ArtifactStore,
    snapshot: Snapshot,
}

impl JsonArtifact {
    pub fn new<F, T>(name: impl Into<String>, store: ArtifactStore, snapshot: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Serialize,
    {
        Self {
            name: name.into(),
            store,
            snapshot: Box::new(move || -> Result<serde_json::Value, BoxError> {
                Ok(serde_json::to_value(snapshot())?)
            }),
        }
    }
}

#[async_trait]
impl Artifact for JsonArtifact {
    fn name(&self) -> &str {
        &self.name
    }

    async fn persist(&self) -> Result<(), BoxError> {
        let value = (self.snapshot)()?;
        self.store.dump(&self.name, &value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn dump_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let mut accounts = BTreeMap::new();
        accounts.insert("alice".to_string(), 3u32);
        let path = store.dump("accounts", &accounts).await.unwrap();

        assert_eq!(path, dir.path().join("pickles").join("accounts.json"));
        let loaded: BTreeMap<String, u32> = store.load("accounts").await.unwrap().unwrap();
        assert_eq!(loaded, accounts);
        assert!(!dir.path().join("pickles").join(".accounts.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let loaded: Option<Vec<u64>> = store.load("cells").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn json_artifact_persists_current_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let artifact = JsonArtifact::new("forts", store.clone(), || vec!["fort-1", "fort-2"]);

        artifact.persist().await.unwrap();
        let loaded: Vec<String> = store.load("forts").await.unwrap().unwrap();
        assert_eq!(loaded, vec!["fort-1", "fort-2"]);
    }
}
