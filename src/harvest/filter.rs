//! Allow-list / deny-list filtering of discovered sets.

use std::collections::BTreeSet;

use tracing::debug;

use super::tracker::FilterReason;
use crate::config::RepositoryConfig;
use crate::protocol::SetDescriptor;

/// Outcome of filtering one set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Harvest,
    Skip(FilterReason),
}

/// Which list, if any, is active. The two are mutually exclusive; the
/// configuration refuses to build otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetFilter {
    All,
    Allow(BTreeSet<String>),
    Deny(BTreeSet<String>),
}

impl SetFilter {
    /// Builds the filter from a validated configuration.
    #[must_use]
    pub fn from_config(config: &RepositoryConfig) -> Self {
        if !config.allow_sets().is_empty() {
            Self::Allow(config.allow_sets().clone())
        } else if !config.deny_sets().is_empty() {
            Self::Deny(config.deny_sets().clone())
        } else {
            Self::All
        }
    }

    /// Decides whether `set` is harvested.
    ///
    /// The synthetic default set is always harvested: it only exists when
    /// the repository has no sets to filter.
    #[must_use]
    pub fn decide(&self, set: &SetDescriptor) -> FilterDecision {
        if set.is_default() {
            return FilterDecision::Harvest;
        }
        let decision = match self {
            Self::All => FilterDecision::Harvest,
            Self::Allow(ids) if ids.contains(&set.spec) => FilterDecision::Harvest,
            Self::Allow(_) => FilterDecision::Skip(FilterReason::Allow),
            Self::Deny(ids) if ids.contains(&set.spec) => FilterDecision::Skip(FilterReason::Deny),
            Self::Deny(_) => FilterDecision::Harvest,
        };
        debug!(set = %set.spec, ?decision, "set filter decision");
        decision
    }
}
