//! Error types for the harvest engine.
//!
//! Per-set failures are recorded on [`SetStatus`](super::SetStatus) and never
//! surface here. Only job-level problems propagate to the caller.

use thiserror::Error;

use super::tracker::SetPhase;
use crate::config::ConfigError;
use crate::protocol::OaiError;

/// An illegal state transition was requested on a set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("set {identifier:?}: cannot {action} while {from}")]
    InvalidTransition {
        /// The set identifier.
        identifier: String,
        /// The phase the set was in.
        from: SetPhase,
        /// The attempted action.
        action: &'static str,
    },
}

/// Errors that abort a whole harvest job.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Invalid configuration, detected before any network call.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The repository could not be used at all (client construction failed,
    /// or `ListSets` failed after retries).
    #[error("repository {base_url} unavailable: {source}")]
    Repository {
        /// The repository base URL.
        base_url: String,
        /// The last protocol client error.
        #[source]
        source: OaiError,
    },

    /// Internal state machine violation.
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl HarvestError {
    /// Creates a repository error.
    pub fn repository(base_url: impl Into<String>, source: OaiError) -> Self {
        Self::Repository {
            base_url: base_url.into(),
            source,
        }
    }

    /// Returns true if the error was detected before any network activity.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
