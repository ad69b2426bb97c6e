//! Error types for harvest configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a [`RepositoryConfig`](super::RepositoryConfig).
///
/// All of these are detected before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No base URL was supplied.
    #[error("missing repository base URL")]
    MissingBaseUrl,

    /// The base URL is not an absolute http(s) URL.
    #[error("invalid repository base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No repository prefix was supplied.
    #[error("missing repository prefix")]
    MissingRepoPrefix,

    /// The metadata prefix is empty.
    #[error("missing metadata prefix")]
    MissingMetadataPrefix,

    /// Both allow-list and deny-list are non-empty.
    #[error(
        "allow-list ({allow} sets) and deny-list ({deny} sets) are mutually exclusive; configure at most one"
    )]
    ConflictingSetLists {
        /// Number of allow-list entries.
        allow: usize,
        /// Number of deny-list entries.
        deny: usize,
    },

    /// A numeric setting is outside its accepted range.
    #[error("invalid value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// The setting name.
        field: &'static str,
        /// The rejected value.
        value: u64,
        /// Human readable accepted range.
        expected: &'static str,
    },

    /// A set list file could not be read.
    #[error("cannot read set list file '{path}': {source}")]
    ListFile {
        /// The list file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Creates an out-of-range error.
    pub fn out_of_range(field: &'static str, value: u64, expected: &'static str) -> Self {
        Self::OutOfRange {
            field,
            value,
            expected,
        }
    }

    /// Creates an invalid base URL error.
    pub fn invalid_base_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBaseUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
