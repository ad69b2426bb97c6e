//! End-of-job harvest report.

use std::fmt::{self, Write as _};
use std::time::Duration;

use chrono::NaiveDate;

use super::tracker::{FilterReason, SetPhase, SetStatus};
use crate::sink::DEFAULT_SET_SEGMENT;

/// Overall job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every scheduled set reached a terminal state and `latest.txt` was
    /// written. Failed sets are allowed unless fail-on-error is set.
    Success,
    /// Fail-on-error tripped, or the `latest.txt` pointer could not be stored.
    Failed,
    /// Cancelled between pages; the checkpoint was kept.
    Interrupted,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::Failed => "failure",
            Self::Interrupted => "interrupted",
        };
        write!(f, "{label}")
    }
}

/// Report groups, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportGroup {
    Harvested,
    Empty,
    FilteredAllow,
    FilteredDeny,
    Failed,
    Incomplete,
}

impl ReportGroup {
    const ALL: [Self; 6] = [
        Self::Harvested,
        Self::Empty,
        Self::FilteredAllow,
        Self::FilteredDeny,
        Self::Failed,
        Self::Incomplete,
    ];

    fn of(status: &SetStatus) -> Self {
        match status.phase() {
            SetPhase::Exhausted if status.pages() > 0 => Self::Harvested,
            SetPhase::Exhausted => Self::Empty,
            SetPhase::Filtered(FilterReason::Allow) => Self::FilteredAllow,
            SetPhase::Filtered(FilterReason::Deny) => Self::FilteredDeny,
            SetPhase::Failed => Self::Failed,
            SetPhase::NotStarted | SetPhase::Fetching | SetPhase::Recording => Self::Incomplete,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Harvested => "harvested",
            Self::Empty => "empty",
            Self::FilteredAllow => "filtered by allow-list",
            Self::FilteredDeny => "filtered by deny-list",
            Self::Failed => "failed",
            Self::Incomplete => "incomplete",
        }
    }
}

/// Everything known about a finished (or stopped) job.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub repository_name: Option<String>,
    pub base_url: String,
    pub metadata_prefix: String,
    pub harvest_date: NaiveDate,
    pub outcome: JobOutcome,
    pub elapsed: Duration,
    /// One status per considered set, in discovery order.
    pub sets: Vec<SetStatus>,
    /// Job-level failure not attributable to a set.
    pub job_error: Option<String>,
    /// Checkpoint saves that failed; a rerun after a crash may repeat work.
    pub checkpoint_save_failures: u32,
}

impl HarvestReport {
    /// Statuses belonging to `group`, in discovery order.
    #[must_use]
    pub fn group(&self, group: ReportGroup) -> Vec<&SetStatus> {
        self.sets
            .iter()
            .filter(|status| ReportGroup::of(status) == group)
            .collect()
    }

    /// Looks up a set's status by identifier.
    #[must_use]
    pub fn set(&self, identifier: &str) -> Option<&SetStatus> {
        self.sets.iter().find(|status| status.identifier() == identifier)
    }

    /// Number of failed sets.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.group(ReportGroup::Failed).len()
    }

    /// Renders the human-readable report.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let name = self.repository_name.as_deref().unwrap_or("(unknown)");
        // Writing to a String cannot fail.
        let _ = writeln!(out, "Harvest report: {name}");
        let _ = writeln!(out, "  base URL:        {}", self.base_url);
        let _ = writeln!(out, "  metadata prefix: {}", self.metadata_prefix);
        let _ = writeln!(out, "  harvest date:    {}", self.harvest_date.format("%Y-%m-%d"));
        let _ = writeln!(out, "  outcome:         {}", self.outcome);
        let _ = writeln!(out, "  elapsed:         {}ms", self.elapsed.as_millis());
        if let Some(error) = &self.job_error {
            let _ = writeln!(out, "  error:           {error}");
        }
        if self.checkpoint_save_failures > 0 {
            let _ = writeln!(
                out,
                "  checkpoint:      {} save(s) failed, resume may repeat pages",
                self.checkpoint_save_failures
            );
        }

        let counts: Vec<String> = ReportGroup::ALL
            .iter()
            .map(|group| format!("{}={}", group.label(), self.group(*group).len()))
            .collect();
        let _ = writeln!(out, "  sets: {}", counts.join(", "));

        for group in ReportGroup::ALL {
            let members = self.group(group);
            if members.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{} ({}):", capitalize(group.label()), members.len());
            for status in members {
                let _ = writeln!(out, "{}", set_line(status));
                if let Some(error) = status.error() {
                    let _ = writeln!(out, "    error: {error}");
                }
            }
        }
        out
    }
}

impl fmt::Display for HarvestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn set_line(status: &SetStatus) -> String {
    let identifier = if status.identifier().is_empty() {
        DEFAULT_SET_SEGMENT
    } else {
        status.identifier()
    };
    format!(
        "  {identifier} ({}): files={} records={} elapsed={}ms",
        status.title(),
        status.files(),
        status.records(),
        status.elapsed_ms()
    )
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
