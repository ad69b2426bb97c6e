//! Resumable job progress.
//!
//! At most one checkpoint exists per `(repoPrefix, metadataPrefix)`. Its
//! presence means the previous run did not finish cleanly; it is deleted
//! once a job completes successfully.

mod file;

pub use file::FileCheckpointStore;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::harvest::SetStatus;

/// Errors from loading or saving a checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where to pick up an interrupted set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePoint {
    /// Set identifier (empty for the default set).
    pub set: String,
    /// The token to send next.
    pub token: String,
    pub cursor: u64,
    pub size: u64,
    /// Pages already archived for this set.
    pub pages: u32,
    /// Records already archived for this set.
    pub records: u64,
}

/// Persisted job progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub repo_prefix: String,
    pub metadata_prefix: String,
    /// The date partition of the interrupted run; a resumed run reuses it.
    pub harvest_date: NaiveDate,
    /// The set in flight, if one was mid-list.
    pub current: Option<ResumePoint>,
    /// Terminal statuses of sets completed earlier in the run.
    pub finished: Vec<SetStatus>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates an empty checkpoint for a job.
    #[must_use]
    pub fn new(repo_prefix: &str, metadata_prefix: &str, harvest_date: NaiveDate) -> Self {
        Self {
            repo_prefix: repo_prefix.to_string(),
            metadata_prefix: metadata_prefix.to_string(),
            harvest_date,
            current: None,
            finished: Vec::new(),
            saved_at: Utc::now(),
        }
    }

    /// Returns true if this checkpoint belongs to the given job key.
    #[must_use]
    pub fn matches(&self, repo_prefix: &str, metadata_prefix: &str) -> bool {
        self.repo_prefix == repo_prefix && self.metadata_prefix == metadata_prefix
    }
}

/// Persistence for [`Checkpoint`]s.
///
/// The orchestrator is the only writer.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored checkpoint, if any.
    async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Replaces the stored checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Deletes the stored checkpoint. Succeeds if there is none.
    async fn clear(&self) -> Result<(), CheckpointError>;
}

/// The "no checkpointing" strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpointStore;

#[async_trait]
impl CheckpointStore for NoCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(None)
    }

    async fn save(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        Ok(())
    }
}
