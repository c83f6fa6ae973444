//! HTTP Range Helpers
//!
//! Retry policy and byte-range header handling shared by HTTP-backed
//! [`DataSource`](crate::source::DataSource) implementations.

use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Status codes worth retrying: server errors and rate limiting.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

/// Builds the `Range` header value for a request, or `None` when the whole
/// resource is requested.
pub fn range_header(position: u64, length: Option<u64>) -> Option<String> {
    match length {
        Some(0) => None,
        Some(len) => Some(format!("bytes={}-{}", position, position + len - 1)),
        None if position == 0 => None,
        None => Some(format!("bytes={}-", position)),
    }
}

/// Parsed `Content-Range: bytes <start>-<end>/<total>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// Total resource size, `None` when the server sent `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Number of bytes covered by the range.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes ")?;
        let (range, total) = rest.split_once('/')?;
        let (start, end) = range.split_once('-')?;
        let start: u64 = start.trim().parse().ok()?;
        let end: u64 = end.trim().parse().ok()?;
        if end < start {
            return None;
        }
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };
        Some(Self { start, end, total })
    }
}
