//! Error types for the OAI-PMH protocol client.
//!
//! Every variant carries the request URL (or verb) so failures recorded on a
//! set status are actionable without re-running the harvest.

use thiserror::Error;

/// Errors that can occur while talking to an OAI-PMH repository.
///
/// Server-reported `error` elements on `ListRecords` are *not* errors; they are
/// returned as [`PageResult`](super::PageResult) variants. The
/// [`OaiError::Protocol`] variant is only used by verbs where a protocol
/// error has no benign interpretation (`Identify`, `ListSets`, ...).
#[derive(Debug, Error)]
pub enum OaiError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The request URL.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The request URL.
        url: String,
    },

    /// HTTP error response that did not contain an OAI-PMH envelope.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (503 flow control, 429).
        retry_after: Option<String>,
    },

    /// The response body is not a usable OAI-PMH document.
    #[error("malformed OAI-PMH response from {url}: {reason}")]
    Malformed {
        /// The request URL.
        url: String,
        /// What was wrong with the document.
        reason: String,
    },

    /// The repository answered with an OAI-PMH `error` element.
    #[error("OAI-PMH error on {verb}: {code}: {message}")]
    Protocol {
        /// The verb that was requested.
        verb: &'static str,
        /// The OAI-PMH error code (e.g. `badArgument`).
        code: String,
        /// The human readable message sent by the server.
        message: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl OaiError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a malformed response error.
    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a protocol error for a verb.
    pub fn protocol(
        verb: &'static str,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            verb,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns the Retry-After header value carried by an HTTP status error.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}
