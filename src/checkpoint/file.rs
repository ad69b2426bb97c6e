//! JSON checkpoint file on the local filesystem.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};

use super::{Checkpoint, CheckpointError, CheckpointStore};
use crate::sink::safe_segment;

/// Stores the checkpoint as pretty JSON at
/// `{dir}/{repoPrefixSafe}__{metadataPrefixSafe}.checkpoint.json`.
///
/// Saves write a temporary file and rename it over the previous checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store for one `(repo_prefix, metadata_prefix)` job key.
    #[must_use]
    pub fn new(dir: &Path, repo_prefix: &str, metadata_prefix: &str) -> Self {
        let file_name = format!(
            "{}__{}.checkpoint.json",
            safe_segment(repo_prefix),
            safe_segment(metadata_prefix)
        );
        Self {
            path: dir.join(file_name),
        }
    }

    /// The checkpoint file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let checkpoint =
            serde_json::from_slice(&raw).map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        debug!("checkpoint loaded");
        Ok(Some(checkpoint))
    }

    #[instrument(skip(self, checkpoint), fields(path = %self.path.display()))]
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let json =
            serde_json::to_vec_pretty(checkpoint).map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, json).await.map_err(|e| self.io_error(e))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        debug!("checkpoint saved");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn clear(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("checkpoint cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use super::*;
    use crate::checkpoint::ResumePoint;

    fn sample() -> Checkpoint {
        let mut checkpoint = Checkpoint::new(
            "repo",
            "oai_dc",
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );
        checkpoint.current = Some(ResumePoint {
            set: "S1".to_string(),
            token: "abc|100".to_string(),
            cursor: 100,
            size: 1234,
            pages: 1,
            records: 100,
        });
        checkpoint
    }

    #[test]
    fn test_path_is_keyed_by_repo_and_prefix() {
        let store = FileCheckpointStore::new(Path::new("/var/lib/oai"), "my repo", "oai_dc");
        assert_eq!(
            store.path(),
            Path::new("/var/lib/oai/my_repo__oai_dc.checkpoint.json")
        );
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path(), "repo", "oai_dc");
        let checkpoint = sample();

        store.save(&checkpoint).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path(), "repo", "oai_dc");
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_file_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path(), "repo", "oai_dc");
        store.save(&sample()).await.unwrap();
        store.clear().await.unwrap();
        assert!(!store.path().exists());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path(), "repo", "oai_dc");
        std::fs::write(store.path(), b"{ not json").unwrap();
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_save_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(&dir.path().join("nested/state"), "repo", "oai_dc");
        store.save(&sample()).await.unwrap();
        assert!(store.path().exists());
    }
}
