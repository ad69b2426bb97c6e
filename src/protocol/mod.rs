//! OAI-PMH protocol client.
//!
//! This module issues the four verbs the harvester needs (`Identify`,
//! `ListMetadataFormats`, `ListSets`, `ListRecords`) and parses responses just
//! enough to drive pagination.
//!
//! # Failure model
//!
//! The boundary distinguishes two kinds of outcome:
//! - Transport and parse failures surface as [`OaiError`] and are candidates
//!   for retry.
//! - Server-reported `error` elements on `ListRecords` are *answers*, returned
//!   as [`PageResult::EmptySet`] (`noRecordsMatch`) or
//!   [`PageResult::ProtocolError`] (anything else), and are never retried.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use oai_harvester::protocol::{OaiClient, PageResult};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let base = Url::parse("https://repo.example.org/oai")?;
//! let client = OaiClient::new(&base, "oai_dc", Duration::from_secs(30), Duration::from_secs(300))?;
//! for set in client.list_sets().await? {
//!     if let PageResult::Records(page) = client.list_records(Some(&set), None).await? {
//!         println!("{}: {} records on first page", set.spec, page.record_count);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
pub mod parse;

pub use client::{OaiClient, SetsPage, merge_sets};
pub use error::OaiError;

/// Error code meaning "the request is valid but matches no records".
pub const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// Error code meaning "this repository does not support sets".
pub const NO_SET_HIERARCHY: &str = "noSetHierarchy";

/// OAI-PMH verb names.
pub mod verb {
    /// `Identify`
    pub const IDENTIFY: &str = "Identify";
    /// `ListMetadataFormats`
    pub const LIST_METADATA_FORMATS: &str = "ListMetadataFormats";
    /// `ListSets`
    pub const LIST_SETS: &str = "ListSets";
    /// `ListRecords`
    pub const LIST_RECORDS: &str = "ListRecords";
}

/// Identification fields returned by `Identify`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub repository_name: String,
    pub base_url: String,
    pub protocol_version: String,
    pub admin_emails: Vec<String>,
    pub earliest_datestamp: String,
    pub deleted_record: String,
    pub granularity: String,
}

/// A metadata format advertised by `ListMetadataFormats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFormat {
    pub metadata_prefix: String,
    pub schema: String,
    pub metadata_namespace: String,
}

/// A set discovered through `ListSets`.
///
/// `spec` is the stable key; `name` is display-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDescriptor {
    /// The `setSpec` identifier. Empty for the default (whole repository) set.
    pub spec: String,
    /// The `setName` title, percent-decoded.
    pub name: String,
}

impl SetDescriptor {
    /// Creates a set descriptor.
    pub fn new(spec: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            name: name.into(),
        }
    }

    /// The synthetic set used when a repository exposes no sets.
    ///
    /// Requests for it carry no `set` parameter.
    #[must_use]
    pub fn default_set() -> Self {
        Self::new("", "all records")
    }

    /// Returns true for the synthetic default set.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.spec.is_empty()
    }
}

/// An OAI-PMH `error` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolErrorElement {
    pub code: String,
    pub message: String,
}

/// One page of a `ListRecords` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordsPage {
    /// The response body exactly as received.
    pub raw: Vec<u8>,
    /// Token for the next request; `None` when the list is complete.
    pub next_token: Option<String>,
    /// The token's `cursor` attribute, when sent.
    pub cursor: Option<u64>,
    /// The token's `completeListSize` attribute, when sent.
    pub complete_list_size: Option<u64>,
    /// Number of `record` elements on this page.
    pub record_count: u64,
    /// True when the page was read by the degraded token search because the
    /// body is not well-formed XML.
    pub degraded: bool,
}

/// Result of a single `ListRecords` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageResult {
    /// A page of records.
    Records(RecordsPage),
    /// The server answered `noRecordsMatch`: a successful, empty result.
    EmptySet,
    /// Any other server-reported error code; fatal for the set.
    ProtocolError {
        /// The OAI-PMH error code.
        code: String,
        /// The server's message(s).
        message: String,
    },
}
