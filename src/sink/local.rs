//! Local filesystem sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};

use super::{Sink, SinkError, validate_logical_path};

/// Writes blobs under a root directory.
///
/// Each write goes to a temporary sibling file which is then renamed into
/// place, so a crash never leaves a truncated page at its final path.
#[derive(Debug, Clone)]
pub struct LocalSink {
    root: PathBuf,
}

impl LocalSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Sink for LocalSink {
    #[instrument(skip(self, bytes, _content_type), fields(root = %self.root.display(), len = bytes.len()))]
    async fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<(), SinkError> {
        validate_logical_path(path)?;
        let target = self.root.join(path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::io(parent, e))?;
        }

        let mut temp_name = target.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
        temp_name.push(".tmp");
        let temp = target.with_file_name(temp_name);

        fs::write(&temp, bytes)
            .await
            .map_err(|e| SinkError::io(&temp, e))?;
        fs::rename(&temp, &target)
            .await
            .map_err(|e| SinkError::io(&target, e))?;

        debug!(path = %target.display(), "stored blob");
        Ok(())
    }
}
