//! Durable storage for harvested pages.
//!
//! A [`Sink`] has exactly one capability: store bytes at a logical path.
//! [`PageLayout`] builds those paths so every sink sees the same addresses:
//!
//! ```text
//! {repoPrefix}/{metadataPrefix}/{harvestDate}/{setSafe}/{sequence}.xml
//! {repoPrefix}/{metadataPrefix}/latest.txt
//! ```

mod local;
mod memory;
mod object_store;

pub use local::LocalSink;
pub use memory::MemorySink;
pub use object_store::ObjectStoreSink;

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

/// Content type of archived pages.
pub const CONTENT_TYPE_XML: &str = "text/xml; charset=utf-8";

/// Content type of the `latest.txt` pointer.
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Path segment used for the synthetic default set.
pub const DEFAULT_SET_SEGMENT: &str = "_all";

/// Errors from storing a blob.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Filesystem failure.
    #[error("I/O error writing {path}: {source}")]
    Io {
        /// The file being written.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The object store could not be reached.
    #[error("network error uploading to {url}: {source}")]
    Network {
        /// The upload URL.
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The object store answered with a non-success status.
    #[error("object store rejected upload to {url}: HTTP {status}")]
    Rejected {
        /// The upload URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The logical path is absolute, empty or escapes the root.
    #[error("invalid logical path: {path:?}")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },
}

impl SinkError {
    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }
}

/// Write-only blob storage.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Durably stores `bytes` at `path`, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the blob was not stored. A page must never be
    /// silently dropped.
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), SinkError>;
}

/// Logical path construction for one job.
///
/// The harvest date is fixed once per job so a run's output lands under a
/// single date partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLayout {
    repo_prefix: String,
    metadata_prefix: String,
    harvest_date: NaiveDate,
}

impl PageLayout {
    #[must_use]
    pub fn new(repo_prefix: &str, metadata_prefix: &str, harvest_date: NaiveDate) -> Self {
        Self {
            repo_prefix: safe_segment(repo_prefix),
            metadata_prefix: safe_segment(metadata_prefix),
            harvest_date,
        }
    }

    #[must_use]
    pub fn harvest_date(&self) -> NaiveDate {
        self.harvest_date
    }

    /// Path of page `sequence` (1-based) of `set`.
    #[must_use]
    pub fn page_path(&self, set: &str, sequence: u32) -> String {
        format!(
            "{}/{}/{}/{}/{sequence}.xml",
            self.repo_prefix,
            self.metadata_prefix,
            self.harvest_date.format("%Y-%m-%d"),
            set_segment(set),
        )
    }

    /// Path of the "latest successful harvest" pointer.
    #[must_use]
    pub fn latest_path(&self) -> String {
        format!("{}/{}/latest.txt", self.repo_prefix, self.metadata_prefix)
    }

    /// Content of the pointer: the ISO harvest date.
    #[must_use]
    pub fn latest_contents(&self) -> String {
        self.harvest_date.format("%Y-%m-%d").to_string()
    }
}

/// Reversible filesystem- and URL-safe form of a set identifier.
///
/// Bytes outside `[A-Za-z0-9.-]`, `_` included, become `_` followed by two
/// uppercase hex digits, so distinct identifiers never share a directory.
/// A segment made only of dots is escaped entirely. The default set (empty
/// identifier) maps to [`DEFAULT_SET_SEGMENT`], which no escaped identifier
/// can produce.
#[must_use]
pub fn set_segment(set: &str) -> String {
    if set.is_empty() {
        return DEFAULT_SET_SEGMENT.to_string();
    }
    let dots_only = set.bytes().all(|byte| byte == b'.');
    let mut encoded = String::with_capacity(set.len());
    for byte in set.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || (byte == b'.' && !dots_only) {
            encoded.push(char::from(byte));
        } else {
            // Writing to a String cannot fail.
            let _ = write!(encoded, "_{byte:02X}");
        }
    }
    encoded
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
///
/// Lossy, so only used for the operator-chosen prefixes. Set identifiers go
/// through [`set_segment`].
///
/// A segment made only of dots becomes underscores so it can never act as a
/// relative path component.
#[must_use]
pub fn safe_segment(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.chars().all(|c| c == '.') {
        "_".repeat(sanitized.len().max(1))
    } else {
        sanitized
    }
}

/// Checks that `path` is a non-empty relative path without `.`/`..` or empty
/// segments.
///
/// # Errors
///
/// Returns [`SinkError::InvalidPath`] otherwise.
pub fn validate_logical_path(path: &str) -> Result<(), SinkError> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(SinkError::invalid_path(path))
    }
}
