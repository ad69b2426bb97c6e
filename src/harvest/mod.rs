//! The harvest engine: set filtering, per-set pagination, retries and
//! reporting.
//!
//! # Failure classification
//!
//! Transport and parse failures are retried up to the configured number of
//! attempts with a fixed delay. Server-reported OAI-PMH errors are never
//! retried: `noRecordsMatch` exhausts the set with zero files, anything else
//! fails it. A failed set never stops other sets unless fail-on-error is
//! configured.

mod error;
mod filter;
mod orchestrator;
mod report;
mod retry;
mod tracker;

pub use error::{HarvestError, TrackerError};
pub use filter::{FilterDecision, SetFilter};
pub use orchestrator::Harvester;
pub use report::{HarvestReport, JobOutcome, ReportGroup};
pub use retry::{
    FailureType, MAX_RETRY_AFTER, RetryDecision, RetryPolicy, classify_error, parse_retry_after,
};
pub use tracker::{
    FILES_FAILED, FILES_FILTERED_ALLOW, FILES_FILTERED_DENY, FilterReason, SetPhase, SetStatus,
};
