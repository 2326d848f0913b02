//! Bounded connection retry

use std::time::Duration;

/// Retry policy for connection attempts
///
/// Controls how many times a failed handshake is retried and how long to
/// wait between attempts. The delay is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(2000),
        }
    }
}

/// Retry bookkeeping for one session
///
/// Created fresh for every session; reconnects within a session keep
/// counting until the cap is hit.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// Start counting under `policy`
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a failed attempt
    ///
    /// Returns the delay before the next attempt, or `None` once the
    /// retry cap has been reached.
    pub const fn on_failure(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        self.attempt += 1;
        Some(self.policy.delay)
    }

    /// Retries used so far
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Retry cap
    #[must_use]
    pub const fn max(&self) -> u32 {
        self.policy.max_retries
    }

    /// Connection attempts made, counting the first
    #[must_use]
    pub const fn attempts_made(&self) -> u32 {
        self.attempt + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Default policy -------------------------------------------------------

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }

    // -- on_failure -----------------------------------------------------------

    #[test]
    fn retries_up_to_cap_with_fixed_delay() {
        let mut state = RetryState::new(RetryPolicy::default());

        for expected in 1..=3 {
            assert_eq!(state.on_failure(), Some(Duration::from_secs(2)));
            assert_eq!(state.attempt(), expected);
        }
        assert_eq!(state.on_failure(), None);
        assert_eq!(state.attempt(), 3);
        assert_eq!(state.attempts_made(), 4);
    }

    #[test]
    fn zero_retries_gives_up_immediately() {
        let mut state = RetryState::new(RetryPolicy {
            max_retries: 0,
            delay: Duration::from_millis(10),
        });
        assert_eq!(state.on_failure(), None);
        assert_eq!(state.attempts_made(), 1);
    }

    #[test]
    fn fresh_state_starts_at_zero() {
        let mut first = RetryState::new(RetryPolicy::default());
        first.on_failure();
        first.on_failure();

        let second = RetryState::new(RetryPolicy::default());
        assert_eq!(second.attempt(), 0);
        assert_eq!(second.max(), 3);
    }
}
