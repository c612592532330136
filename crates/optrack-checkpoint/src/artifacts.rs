use std::path::{Path, PathBuf};

use optrack_core::Stage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CheckpointError;
use crate::fsio::atomic_write;

/// Per-partition stage outputs, one JSON file per stage.
///
/// Layout: `<root>/<partition-digest>/<stage>.json`. The directory name is a
/// hash prefix of the partition key so arbitrary category names are safe on
/// any filesystem.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, partition: &str, stage: Stage) -> PathBuf {
        self.root
            .join(partition_dir(partition))
            .join(format!("{}.json", stage.name()))
    }

    /// # Errors
    ///
    /// Returns an error if `value` does not serialize or the write fails.
    pub fn save<T: Serialize>(
        &self,
        partition: &str,
        stage: Stage,
        value: &T,
    ) -> Result<(), CheckpointError> {
        let path = self.path_for(partition, stage);
        let bytes = serde_json::to_vec_pretty(value)?;
        atomic_write(&path, &bytes)?;
        tracing::debug!(partition, %stage, path = %path.display(), "artifact saved");
        Ok(())
    }

    /// Load a previously saved artifact, or `None` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] if the file exists but does not parse.
    pub fn load<T: DeserializeOwned>(
        &self,
        partition: &str,
        stage: Stage,
    ) -> Result<Option<T>, CheckpointError> {
        let path = self.path_for(partition, stage);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Remove every stored artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(&self.root, e)),
        }
    }
}

fn partition_dir(partition: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(partition.as_bytes()));
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let loaded: Option<Vec<String>> = store.load("economy", Stage::Merge).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn saved_artifact_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store
            .save("economy", Stage::Merge, &vec!["op-1", "op-2"])
            .unwrap();
        let loaded: Option<Vec<String>> = store.load("economy", Stage::Merge).unwrap();
        assert_eq!(loaded, Some(vec!["op-1".to_string(), "op-2".to_string()]));
    }

    #[test]
    fn partitions_and_stages_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save("economy", Stage::Merge, &1).unwrap();
        store.save("economy/policy", Stage::Merge, &2).unwrap();
        store.save("economy", Stage::Evolve, &3).unwrap();
        assert_eq!(store.load::<i32>("economy", Stage::Merge).unwrap(), Some(1));
        assert_eq!(
            store.load::<i32>("economy/policy", Stage::Merge).unwrap(),
            Some(2)
        );
        assert_eq!(store.load::<i32>("economy", Stage::Evolve).unwrap(), Some(3));
    }

    #[test]
    fn unreadable_artifact_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.path_for("economy", Stage::Track);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"[1,").unwrap();
        let err = store.load::<Vec<i32>>("economy", Stage::Track).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[test]
    fn clear_removes_root_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("intermediate"));
        store.clear().unwrap();
        store.save("economy", Stage::Merge, &1).unwrap();
        store.clear().unwrap();
        assert!(!store.root().exists());
    }
}
