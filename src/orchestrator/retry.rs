// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Exponential backoff for startup retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub factor: u32,
    /// Attempts including the first one
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            factor: 2,
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            config: self.clone(),
            current: self.initial_backoff,
            attempts: 1,
        }
    }
}

/// Delay sequence of one retried operation
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;

        let backoff_ms = self.current.as_millis() as i64;
        let mut v = backoff_ms / 2;
        // avoid div by zero
        if v == 0 {
            v = 1;
        }

        // exponential backoff with jitter of +/- a quarter
        let jitter = rand::random_range(-(v / 2)..=(v / 2));
        let mut sleep_ms = backoff_ms + jitter;
        if sleep_ms < 0 {
            sleep_ms = 1;
        }

        self.current = std::cmp::min(
            self.current.saturating_mul(self.config.factor.max(1)),
            self.config.max_backoff,
        );
        Some(Duration::from_millis(sleep_ms as u64))
    }

    /// Attempts made so far, counting the first
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_are_bounded() {
        let config = RetryConfig {
            max_attempts: 3,
            ..Default::default()
        };
        let mut backoff = config.backoff();

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_delays_grow_and_are_capped() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(400),
            max_backoff: Duration::from_millis(1000),
            factor: 2,
            max_attempts: 10,
        };
        let mut backoff = config.backoff();

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(delays.len(), 9);

        // jitter stays within a quarter either side of the nominal delay
        let within = |d: Duration, nominal: u64| {
            let ms = d.as_millis() as u64;
            ms >= nominal * 3 / 4 - 1 && ms <= nominal * 5 / 4 + 1
        };
        assert!(within(delays[0], 400));
        assert!(within(delays[1], 800));
        for d in &delays[2..] {
            assert!(within(*d, 1000), "{:?}", d);
        }
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let config = RetryConfig {
            max_attempts: 1,
            ..Default::default()
        };
        assert!(config.backoff().next_delay().is_none());
    }
}
