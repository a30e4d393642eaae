//! Reconnect backoff policies.

use std::time::Duration;

/// An iterator over increasing reconnect delays, doubling each attempt up
/// to a ceiling, optionally giving up after a retry limit.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_sleep: Duration,
    max_retries: Option<u32>,
    current_sleep: Duration,
    retry_count: u32,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `initial_sleep`, doubling up to
    /// `max_sleep`, giving up after `max_retries` attempts if set.
    pub fn new(max_sleep: Duration, max_retries: Option<u32>, initial_sleep: Duration) -> Self {
        Self {
            max_sleep,
            max_retries,
            current_sleep: initial_sleep,
            retry_count: 0,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.max_retries.is_some_and(|max| self.retry_count >= max) {
            return None;
        }
        let sleep = self.current_sleep;
        self.current_sleep = (self.current_sleep * 2).min(self.max_sleep);
        self.retry_count += 1;
        Some(sleep)
    }
}

/// The session's reconnect policy, a factory for backoff iterators.
#[derive(Debug, Clone)]
pub struct SessionRetryPolicy {
    initial_sleep: Duration,
    max_sleep: Duration,
    max_retries: Option<u32>,
}

impl Default for SessionRetryPolicy {
    fn default() -> Self {
        Self {
            initial_sleep: Duration::from_millis(500),
            max_sleep: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl SessionRetryPolicy {
    /// A policy with explicit limits. `max_retries` of `None` retries
    /// forever.
    pub fn new(max_sleep: Duration, max_retries: Option<u32>, initial_sleep: Duration) -> Self {
        Self {
            initial_sleep,
            max_sleep,
            max_retries,
        }
    }

    /// A policy that never retries.
    pub fn never() -> Self {
        Self {
            max_retries: Some(0),
            ..Default::default()
        }
    }

    /// Begin a fresh backoff sequence.
    pub fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.max_sleep, self.max_retries, self.initial_sleep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_to_ceiling() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(2),
            Some(4),
            Duration::from_millis(500),
        );
        assert_eq!(backoff.next(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next(), None);
    }

    #[test]
    fn never_policy_yields_nothing() {
        let mut backoff = SessionRetryPolicy::never().new_backoff();
        assert_eq!(backoff.next(), None);
    }
}
