//! Per-set pagination state machine.
//!
//! ```text
//! NotStarted ──begin──▶ Fetching ──accept_records──▶ Recording
//!     │                  │   ▲                          │
//!     │                  │   └──────page_written────────┤ (token present)
//!     │                  │                              ▼
//!     │                  └──exhaust_empty──────────▶ Exhausted
//!     └──filter──▶ Filtered            any ──fail──▶ Failed
//! ```
//!
//! `Exhausted`, `Filtered` and `Failed` are terminal. A [`SetStatus`] owns the
//! token, cursor and declared size for exactly one set; nothing here is
//! shared between sets.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::TrackerError;
use crate::checkpoint::ResumePoint;
use crate::protocol::{RecordsPage, SetDescriptor};

/// `files` value for a set skipped because it is not in the allow-list.
pub const FILES_FILTERED_ALLOW: i64 = -1;
/// `files` value for a set skipped because it is in the deny-list.
pub const FILES_FILTERED_DENY: i64 = -2;
/// `files` value for a set that failed.
pub const FILES_FAILED: i64 = -3;

/// Which list caused a set to be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterReason {
    /// Not present in the allow-list.
    Allow,
    /// Present in the deny-list.
    Deny,
}

/// Lifecycle phase of a set within one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SetPhase {
    NotStarted,
    Fetching,
    Recording,
    Exhausted,
    Filtered(FilterReason),
    Failed,
}

impl SetPhase {
    /// Returns true for phases with no outgoing transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Filtered(_) | Self::Failed)
    }
}

impl fmt::Display for SetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not started",
            Self::Fetching => "fetching",
            Self::Recording => "recording",
            Self::Exhausted => "exhausted",
            Self::Filtered(FilterReason::Allow) => "filtered by allow-list",
            Self::Filtered(FilterReason::Deny) => "filtered by deny-list",
            Self::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// Progress and outcome of one set in one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStatus {
    identifier: String,
    title: String,
    phase: SetPhase,
    token: Option<String>,
    cursor: u64,
    size: u64,
    pages: u32,
    records: u64,
    error: Option<String>,
    elapsed_ms: u64,
}

impl SetStatus {
    /// Creates a status in [`SetPhase::NotStarted`].
    #[must_use]
    pub fn new(set: &SetDescriptor) -> Self {
        Self {
            identifier: set.spec.clone(),
            title: set.name.clone(),
            phase: SetPhase::NotStarted,
            token: None,
            cursor: 0,
            size: 0,
            pages: 0,
            records: 0,
            error: None,
            elapsed_ms: 0,
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn phase(&self) -> SetPhase {
        self.phase
    }

    /// The token to send on the next request, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// The last reported offset into the list.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// The server-declared list size (advisory).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Pages written so far.
    #[must_use]
    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Records seen across all written pages.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// The report's `files` column.
    ///
    /// Pages written for live and exhausted sets, otherwise a negative
    /// sentinel: `-1` allow-filtered, `-2` deny-filtered, `-3` failed.
    #[must_use]
    pub fn files(&self) -> i64 {
        match self.phase {
            SetPhase::Filtered(FilterReason::Allow) => FILES_FILTERED_ALLOW,
            SetPhase::Filtered(FilterReason::Deny) => FILES_FILTERED_DENY,
            SetPhase::Failed => FILES_FAILED,
            _ => i64::from(self.pages),
        }
    }

    /// Starts fetching, optionally from a restored checkpoint.
    ///
    /// # Errors
    ///
    /// Fails unless the set is [`SetPhase::NotStarted`].
    pub fn begin(&mut self, resume: Option<&ResumePoint>) -> Result<(), TrackerError> {
        self.expect_phase(SetPhase::NotStarted, "begin")?;
        if let Some(point) = resume {
            debug!(
                set = %self.identifier,
                cursor = point.cursor,
                pages = point.pages,
                "resuming set from checkpoint"
            );
            self.token = Some(point.token.clone());
            self.cursor = point.cursor;
            self.size = point.size;
            self.pages = point.pages;
            self.records = point.records;
        }
        self.phase = SetPhase::Fetching;
        Ok(())
    }

    /// Records a fetched page and returns the sequence number to write it
    /// under.
    ///
    /// The sequence is `pages + 1`; `pages` is restored from the checkpoint,
    /// so numbering continues correctly after a resume.
    ///
    /// # Errors
    ///
    /// Fails unless the set is [`SetPhase::Fetching`].
    pub fn accept_records(&mut self, page: &RecordsPage) -> Result<u32, TrackerError> {
        self.expect_phase(SetPhase::Fetching, "accept records")?;

        self.token = page.next_token.clone().filter(|token| !token.is_empty());
        if page.degraded {
            // The fallback cannot read the server's cursor or size.
            warn!(
                set = %self.identifier,
                "page parsed in degraded mode; progress counters are approximate"
            );
            self.cursor += 1;
            self.size = 0;
        } else {
            self.cursor = page.cursor.unwrap_or(self.cursor + page.record_count);
            self.size = page.complete_list_size.unwrap_or(self.size);
        }
        self.records += page.record_count;
        self.phase = SetPhase::Recording;
        Ok(self.pages + 1)
    }

    /// Confirms that the last accepted page was stored.
    ///
    /// Moves to [`SetPhase::Fetching`] when a token remains, otherwise to
    /// [`SetPhase::Exhausted`].
    ///
    /// # Errors
    ///
    /// Fails unless the set is [`SetPhase::Recording`].
    pub fn page_written(&mut self) -> Result<(), TrackerError> {
        self.expect_phase(SetPhase::Recording, "confirm a page write")?;
        self.pages += 1;
        self.phase = if self.token.is_some() {
            SetPhase::Fetching
        } else {
            SetPhase::Exhausted
        };
        Ok(())
    }

    /// The server answered `noRecordsMatch`.
    ///
    /// # Errors
    ///
    /// Fails unless the set is [`SetPhase::Fetching`].
    pub fn exhaust_empty(&mut self) -> Result<(), TrackerError> {
        self.expect_phase(SetPhase::Fetching, "exhaust")?;
        self.token = None;
        self.phase = SetPhase::Exhausted;
        Ok(())
    }

    /// Marks the set as skipped by a filter list.
    ///
    /// # Errors
    ///
    /// Fails unless the set is [`SetPhase::NotStarted`].
    pub fn filter(&mut self, reason: FilterReason) -> Result<(), TrackerError> {
        self.expect_phase(SetPhase::NotStarted, "filter")?;
        self.phase = SetPhase::Filtered(reason);
        Ok(())
    }

    /// Marks the set as failed with `message`.
    ///
    /// # Errors
    ///
    /// Fails if the set is already terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TrackerError> {
        if self.phase.is_terminal() {
            return Err(self.invalid("fail"));
        }
        self.error = Some(message.into());
        self.phase = SetPhase::Failed;
        Ok(())
    }

    /// Records the time spent on this set during this run.
    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    /// The state needed to resume this set mid-list, when there is one.
    #[must_use]
    pub fn resume_point(&self) -> Option<ResumePoint> {
        if self.phase != SetPhase::Fetching {
            return None;
        }
        let token = self.token.clone()?;
        Some(ResumePoint {
            set: self.identifier.clone(),
            token,
            cursor: self.cursor,
            size: self.size,
            pages: self.pages,
            records: self.records,
        })
    }

    fn expect_phase(&self, expected: SetPhase, action: &'static str) -> Result<(), TrackerError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> TrackerError {
        TrackerError::InvalidTransition {
            identifier: self.identifier.clone(),
            from: self.phase,
            action,
        }
    }
}
