use std::time::Duration;

/// Capped exponential backoff for transient oracle failures.
///
/// The oracle is assumed eventually available, so there is no attempt
/// limit: callers retry forever, sleeping `delay(attempt)` between
/// attempts. Delays double from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Ceiling on the delay.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(1024),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for the given zero-indexed retry attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial
            .saturating_mul(2u32.saturating_pow(attempt));
        doubled.min(self.max)
    }
}
