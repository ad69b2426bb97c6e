//! OAI-PMH Harvester Library
//!
//! Harvests metadata records from OAI-PMH repositories and archives every
//! `ListRecords` page verbatim, one file per page, under a date-partitioned
//! layout. Interrupted runs resume from a checkpoint.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Validated per-repository harvest configuration
//! - [`protocol`] - OAI-PMH verbs over HTTP and envelope parsing
//! - [`harvest`] - Set filtering, pagination, retries and the job report
//! - [`sink`] - Where archived pages are written (local disk, object store, memory)
//! - [`checkpoint`] - Resumable progress records

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checkpoint;
pub mod config;
pub mod harvest;
pub mod protocol;
pub mod sink;
mod user_agent;

// Re-export commonly used types
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, FileCheckpointStore, NoCheckpointStore,
    ResumePoint,
};
pub use config::{ConfigError, RepositoryConfig, RepositoryConfigBuilder};
pub use harvest::{
    FailureType, HarvestError, HarvestReport, Harvester, JobOutcome, RetryPolicy, SetPhase,
    SetStatus,
};
pub use protocol::{OaiClient, OaiError, PageResult, RecordsPage, SetDescriptor};
pub use sink::{LocalSink, MemorySink, ObjectStoreSink, PageLayout, Sink, SinkError};
