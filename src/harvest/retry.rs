//! Bounded retry with a fixed delay for transient protocol client failures.
//!
//! When a request fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - network I/O, timeouts, unusable response bodies
//! - [`FailureType::Permanent`] - failures that won't succeed regardless of retries
//! - [`FailureType::RateLimited`] - HTTP 429 (retried, honouring `Retry-After`)
//!
//! Server-reported OAI-PMH errors never reach this module: they arrive as
//! [`PageResult`](crate::protocol::PageResult) values, which are answers and
//! are not retried.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use oai_harvester::harvest::{classify_error, FailureType, RetryDecision, RetryPolicy};
//! use oai_harvester::protocol::OaiError;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(10));
//! let error = OaiError::http_status("https://repo.example.org/oai", 503);
//! let failure_type = classify_error(&error);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::RepositoryConfig;
use crate::protocol::OaiError;

/// Maximum honoured `Retry-After` value (1 hour).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// How often the interrupt flag is checked while waiting between attempts.
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Classification of protocol client failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: timeout, connection refused, 5xx, malformed body.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, invalid URL, TLS certificate errors.
    Permanent,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Retry configuration: a fixed number of attempts with a fixed delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay between attempts.
    attempt_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, attempt_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_delay,
        }
    }

    /// Creates the policy configured for a repository.
    #[must_use]
    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self::new(config.max_attempts(), config.attempt_delay())
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the fixed delay between attempts.
    #[must_use]
    pub fn attempt_delay(&self) -> Duration {
        self.attempt_delay
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.attempt_delay,
            attempt: attempt + 1,
        }
    }

    /// Runs `operation` until it succeeds or the policy gives up.
    ///
    /// A `Retry-After` header on a retryable HTTP error replaces the fixed
    /// delay for that wait. The error from the final attempt is returned.
    ///
    /// # Errors
    ///
    /// Returns the last [`OaiError`] once retries are exhausted or the
    /// failure is permanent.
    pub async fn run<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, OaiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OaiError>>,
    {
        self.run_interruptible(label, &AtomicBool::new(false), operation)
            .await
    }

    /// Like [`RetryPolicy::run`], but stops waiting between attempts as soon
    /// as `interrupted` is set.
    ///
    /// # Errors
    ///
    /// Returns the last [`OaiError`] once retries are exhausted, the failure
    /// is permanent, or an interrupt cut the wait short.
    pub async fn run_interruptible<T, F, Fut>(
        &self,
        label: &str,
        interrupted: &AtomicBool,
        mut operation: F,
    ) -> Result<T, OaiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OaiError>>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            match self.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    let delay = error
                        .retry_after()
                        .and_then(parse_retry_after)
                        .unwrap_or(delay);
                    info!(
                        operation = label,
                        attempt,
                        max = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "request failed, retrying"
                    );
                    if !wait_unless_interrupted(delay, interrupted).await {
                        info!(operation = label, attempt, "interrupted while waiting to retry");
                        return Err(error);
                    }
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(operation = label, attempt, %reason, error = %error, "giving up");
                    return Err(error);
                }
            }
        }
    }
}

/// Sleeps for `delay`, returning `false` early if `interrupted` is set.
async fn wait_unless_interrupted(delay: Duration, interrupted: &AtomicBool) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(INTERRUPT_POLL_INTERVAL)).await;
    }
}

/// Classifies a protocol client error into a failure type.
///
/// # HTTP Status Code Classification
///
/// | Status | Type | Rationale |
/// |--------|------|-----------|
/// | 408 | Transient | Request timeout - may succeed |
/// | 429 | RateLimited | Rate limited - honour Retry-After |
/// | 5xx | Transient | Server error, incl. 503 flow control |
/// | other 4xx | Permanent | Request will not change on retry |
///
/// # Non-HTTP Errors
///
/// | Error | Type | Rationale |
/// |-------|------|-----------|
/// | Timeout | Transient | Network may recover |
/// | Network (most) | Transient | Server may come back |
/// | Network (TLS) | Permanent | Certificate/config issue |
/// | Malformed | Transient | Truncated or garbled body |
/// | Protocol | Permanent | Definitive server answer |
/// | ClientBuild | Permanent | Won't succeed |
#[instrument]
pub fn classify_error(error: &OaiError) -> FailureType {
    match error {
        OaiError::HttpStatus { status, .. } => classify_http_status(*status),
        OaiError::Timeout { .. } | OaiError::Malformed { .. } => FailureType::Transient,
        OaiError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        OaiError::Protocol { .. } | OaiError::ClientBuild { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,   // Request Timeout
        429 => FailureType::RateLimited, // Too Many Requests
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

/// Parses a `Retry-After` header value (integer seconds or HTTP-date).
///
/// Values above [`MAX_RETRY_AFTER`] are capped; dates in the past yield zero.
/// Returns `None` for negative or unparseable values.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        return Some(cap_retry_after(Duration::from_secs(seconds)));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(cap_retry_after(duration)),
            Err(_) => Some(Duration::ZERO),
        },
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}

fn cap_retry_after(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        MAX_RETRY_AFTER
    } else {
        duration
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    use super::*;

    const URL: &str = "https://repo.example.org/oai";

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_retry_uses_fixed_delay() {
        let policy = RetryPolicy::new(4, Duration::from_secs(10));
        for attempt in 1..4 {
            assert_eq!(
                policy.should_retry(FailureType::Transient, attempt),
                RetryDecision::Retry {
                    delay: Duration::from_secs(10),
                    attempt: attempt + 1,
                }
            );
        }
    }

    #[test]
    fn test_retry_stops_at_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 3),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_permanent_never_retried() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_rate_limited_is_retried() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert!(matches!(
            policy.should_retry(FailureType::RateLimited, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
    }

    // ==================== run() Tests ====================

    #[tokio::test]
    async fn test_run_never_exceeds_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), OaiError> = policy
            .run("test", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OaiError::timeout(URL))
                }
            })
            .await;

        assert!(matches!(result, Err(OaiError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_recovers_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = policy
            .run("test", || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(OaiError::malformed(URL, "truncated"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_immediately_on_permanent_error() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), OaiError> = policy
            .run("test", || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OaiError::http_status(URL, 404))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_interruptible_stops_waiting_when_flag_set() {
        let policy = RetryPolicy::new(3, MAX_RETRY_AFTER);
        let interrupted = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let flag = Arc::clone(&interrupted);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let result: Result<(), OaiError> = tokio::time::timeout(
            Duration::from_secs(10),
            policy.run_interruptible("test", &interrupted, || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OaiError::http_status(URL, 503))
                }
            }),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(OaiError::HttpStatus { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_unless_interrupted_completes_without_flag() {
        let interrupted = AtomicBool::new(false);
        assert!(wait_unless_interrupted(Duration::from_millis(20), &interrupted).await);
        interrupted.store(true, Ordering::SeqCst);
        assert!(!wait_unless_interrupted(MAX_RETRY_AFTER, &interrupted).await);
    }

    // ==================== Error Classification Tests ====================

    #[test]
    fn test_classify_http_statuses() {
        let cases = [
            (400, FailureType::Permanent),
            (403, FailureType::Permanent),
            (404, FailureType::Permanent),
            (408, FailureType::Transient),
            (429, FailureType::RateLimited),
            (500, FailureType::Transient),
            (503, FailureType::Transient),
            (504, FailureType::Transient),
            (302, FailureType::Permanent),
        ];
        for (status, expected) in cases {
            assert_eq!(
                classify_error(&OaiError::http_status(URL, status)),
                expected,
                "status {status}"
            );
        }
    }

    #[test]
    fn test_classify_timeout_and_malformed_transient() {
        assert_eq!(classify_error(&OaiError::timeout(URL)), FailureType::Transient);
        assert_eq!(
            classify_error(&OaiError::malformed(URL, "not xml")),
            FailureType::Transient
        );
    }

    #[test]
    fn test_classify_protocol_error_permanent() {
        assert_eq!(
            classify_error(&OaiError::protocol("ListSets", "badArgument", "nope")),
            FailureType::Permanent
        );
    }

    // ==================== Retry-After Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("86400"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_negative_or_garbage() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_past_date_is_zero() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }
}
