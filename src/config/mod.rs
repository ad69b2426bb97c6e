//! Immutable per-job repository configuration.
//!
//! A [`RepositoryConfig`] is only obtainable through
//! [`RepositoryConfigBuilder::build`], which applies defaults and validates
//! every field. Once built it is read-only for the lifetime of the job.
//!
//! ```
//! use oai_harvester::config::RepositoryConfig;
//!
//! let config = RepositoryConfig::builder()
//!     .base_url("https://repo.example.org/oai")
//!     .repo_prefix("example")
//!     .deny_sets(["test"])
//!     .build()
//!     .unwrap();
//! assert_eq!(config.metadata_prefix(), "oai_dc");
//! ```

mod error;

pub use error::ConfigError;

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, instrument};
use url::Url;

/// Metadata prefix harvested when none is configured.
pub const DEFAULT_METADATA_PREFIX: &str = "oai_dc";

/// Default connect timeout (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout (seconds).
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

/// Default number of attempts per page, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts (seconds).
pub const DEFAULT_ATTEMPT_DELAY_SECS: u64 = 10;

const TIMEOUT_RANGE: (u64, u64) = (1, 3600);
const MAX_ATTEMPTS_RANGE: (u32, u32) = (1, 20);
const MAX_ATTEMPT_DELAY_SECS: u64 = 3600;

/// Immutable configuration for one harvest job.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    base_url: Url,
    repo_prefix: String,
    metadata_prefix: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_attempts: u32,
    attempt_delay: Duration,
    fail_on_error: bool,
    allow_sets: BTreeSet<String>,
    deny_sets: BTreeSet<String>,
}

impl RepositoryConfig {
    /// Starts building a configuration.
    #[must_use]
    pub fn builder() -> RepositoryConfigBuilder {
        RepositoryConfigBuilder::default()
    }

    /// The repository's OAI-PMH endpoint.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Namespace used as the first segment of every output path.
    #[must_use]
    pub fn repo_prefix(&self) -> &str {
        &self.repo_prefix
    }

    /// The metadata format to harvest.
    #[must_use]
    pub fn metadata_prefix(&self) -> &str {
        &self.metadata_prefix
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Attempts per page request, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Fixed delay between attempts.
    #[must_use]
    pub fn attempt_delay(&self) -> Duration {
        self.attempt_delay
    }

    /// Whether the first failed set stops the job.
    #[must_use]
    pub fn fail_on_error(&self) -> bool {
        self.fail_on_error
    }

    /// Set identifiers that may be harvested (empty = no allow-list).
    #[must_use]
    pub fn allow_sets(&self) -> &BTreeSet<String> {
        &self.allow_sets
    }

    /// Set identifiers that must be skipped (empty = no deny-list).
    #[must_use]
    pub fn deny_sets(&self) -> &BTreeSet<String> {
        &self.deny_sets
    }
}

/// Builder for [`RepositoryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfigBuilder {
    base_url: Option<String>,
    repo_prefix: Option<String>,
    metadata_prefix: Option<String>,
    connect_timeout_secs: Option<u64>,
    read_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    attempt_delay: Option<Duration>,
    fail_on_error: bool,
    allow_sets: BTreeSet<String>,
    deny_sets: BTreeSet<String>,
}

impl RepositoryConfigBuilder {
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn repo_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.repo_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn metadata_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metadata_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn read_timeout_secs(mut self, secs: u64) -> Self {
        self.read_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the delay between attempts. Sub-second values are accepted so
    /// tests can run without real waits.
    #[must_use]
    pub fn attempt_delay(mut self, delay: Duration) -> Self {
        self.attempt_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    /// Adds identifiers to the allow-list.
    #[must_use]
    pub fn allow_sets<I, S>(mut self, sets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_sets.extend(normalize_ids(sets));
        self
    }

    /// Adds identifiers to the deny-list.
    #[must_use]
    pub fn deny_sets<I, S>(mut self, sets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_sets.extend(normalize_ids(sets));
        self
    }

    /// Adds every identifier listed in `path` to the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ListFile`] if the file cannot be read.
    pub fn allow_list_file(self, path: &Path) -> Result<Self, ConfigError> {
        let ids = load_set_list(path)?;
        Ok(self.allow_sets(ids))
    }

    /// Adds every identifier listed in `path` to the deny-list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ListFile`] if the file cannot be read.
    pub fn deny_list_file(self, path: &Path) -> Result<Self, ConfigError> {
        let ids = load_set_list(path)?;
        Ok(self.deny_sets(ids))
    }

    /// Applies defaults and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first invalid field.
    pub fn build(self) -> Result<RepositoryConfig, ConfigError> {
        let raw_url = self
            .base_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingBaseUrl)?;
        let base_url = parse_base_url(&raw_url)?;

        let repo_prefix = self
            .repo_prefix
            .map(|prefix| prefix.trim().to_string())
            .filter(|prefix| !prefix.is_empty())
            .ok_or(ConfigError::MissingRepoPrefix)?;

        let metadata_prefix = match self.metadata_prefix {
            None => DEFAULT_METADATA_PREFIX.to_string(),
            Some(prefix) if prefix.trim().is_empty() => {
                return Err(ConfigError::MissingMetadataPrefix);
            }
            Some(prefix) => prefix.trim().to_string(),
        };

        if !self.allow_sets.is_empty() && !self.deny_sets.is_empty() {
            return Err(ConfigError::ConflictingSetLists {
                allow: self.allow_sets.len(),
                deny: self.deny_sets.len(),
            });
        }

        let connect_timeout = validate_timeout(
            "connect_timeout",
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )?;
        let read_timeout = validate_timeout(
            "read_timeout",
            self.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
        )?;

        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if !(MAX_ATTEMPTS_RANGE.0..=MAX_ATTEMPTS_RANGE.1).contains(&max_attempts) {
            return Err(ConfigError::out_of_range(
                "max_attempts",
                u64::from(max_attempts),
                "1..=20",
            ));
        }

        let attempt_delay = self
            .attempt_delay
            .unwrap_or(Duration::from_secs(DEFAULT_ATTEMPT_DELAY_SECS));
        if attempt_delay > Duration::from_secs(MAX_ATTEMPT_DELAY_SECS) {
            return Err(ConfigError::out_of_range(
                "attempt_delay",
                attempt_delay.as_secs(),
                "0..=3600",
            ));
        }

        debug!(
            base_url = %base_url,
            repo_prefix = %repo_prefix,
            metadata_prefix = %metadata_prefix,
            allow = self.allow_sets.len(),
            deny = self.deny_sets.len(),
            "repository config validated"
        );

        Ok(RepositoryConfig {
            base_url,
            repo_prefix,
            metadata_prefix,
            connect_timeout,
            read_timeout,
            max_attempts,
            attempt_delay,
            fail_on_error: self.fail_on_error,
            allow_sets: self.allow_sets,
            deny_sets: self.deny_sets,
        })
    }
}

/// Loads a set list file: one identifier per line.
///
/// Blank lines and lines starting with `#` are skipped; surrounding
/// whitespace is trimmed.
///
/// # Errors
///
/// Returns [`ConfigError::ListFile`] if the file cannot be read.
#[instrument]
pub fn load_set_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ListFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_set_list(&content))
}

fn parse_set_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

fn normalize_ids<I, S>(sets: I) -> impl Iterator<Item = String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    sets.into_iter()
        .map(|set| set.into().trim().to_string())
        .filter(|set| !set.is_empty())
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::invalid_base_url(raw, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::invalid_base_url(
                raw,
                format!("unsupported scheme '{other}'"),
            ));
        }
    }
    if url.query_pairs().any(|(key, _)| key == "verb") {
        return Err(ConfigError::invalid_base_url(
            raw,
            "base URL must not carry a verb parameter",
        ));
    }
    Ok(url)
}

fn validate_timeout(field: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if !(TIMEOUT_RANGE.0..=TIMEOUT_RANGE.1).contains(&secs) {
        return Err(ConfigError::out_of_range(field, secs, "1..=3600"));
    }
    Ok(Duration::from_secs(secs))
}
