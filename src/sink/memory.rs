//! In-memory sink for previews and tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{Sink, SinkError, validate_logical_path};

/// A stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keeps every blob in a map keyed by logical path.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    blobs: Arc<Mutex<BTreeMap<String, StoredBlob>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bytes stored at `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().get(path).map(|blob| blob.bytes.clone())
    }

    /// Returns the blob stored at `path` with its content type.
    #[must_use]
    pub fn blob(&self, path: &str) -> Option<StoredBlob> {
        self.lock().get(path).cloned()
    }

    /// All stored paths in lexical order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// A snapshot of all stored blobs.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.lock()
            .iter()
            .map(|(path, blob)| (path.clone(), blob.bytes.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredBlob>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), SinkError> {
        validate_logical_path(path)?;
        self.lock().insert(
            path.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
