//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::schema::ReconnectConfig;

/// Calculate exponential backoff delay with jitter.
///
/// Attempt 1 waits about `base_ms`; each further attempt doubles the delay up to `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Delays for a bounded sequence of reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    max_attempts: u32,
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl ReconnectSchedule {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
            attempt: 0,
        }
    }

    /// Attempts handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for ReconnectSchedule {
    /// `(attempt number, delay before it)`
    type Item = (u32, Duration);

    fn next(&mut self) -> Option<Self::Item> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some((self.attempt, calculate_backoff(self.attempt, self.base_ms, self.max_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000);
        assert!(max.as_millis() < 1100);
    }

    #[test]
    fn test_schedule_is_bounded() {
        let config = ReconnectConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 25,
        };
        let mut schedule = ReconnectSchedule::new(&config);
        let delays: Vec<_> = schedule.by_ref().collect();
        assert_eq!(delays.len(), 3);
        assert_eq!(delays[0].0, 1);
        assert!(delays[2].1 >= Duration::from_millis(25));
        assert_eq!(schedule.attempts(), 3);
    }
}
