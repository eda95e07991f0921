//! Adaptive request rate controller.
//!
//! One instance is shared across a single bulk job. The rate creeps up
//! after sustained success, drops sharply on throttling, and the delay
//! between requests carries exponential backoff plus jitter so retries
//! never line up.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::LookupSettings;

/// Consecutive successes required before the rate steps up by one.
const SUCCESS_STREAK_STEP: u32 = 5;

/// Rate drop applied on a throttled error.
const THROTTLE_RATE_DROP: u32 = 2;

/// Exponent cap for the backoff multiplier.
const MAX_BACKOFF_EXPONENT: u32 = 4;

/// Tracks request health and derives the spacing for the next request.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    current_rate: u32,
    min_rate: u32,
    max_rate: u32,
    success_streak: u32,
    error_streak: u32,
    backoff_multiplier: u32,
    base_delay: Duration,
}

impl AdaptiveRateLimiter {
    /// Creates a controller starting at `max_rate`.
    #[must_use]
    pub fn new(min_rate: u32, max_rate: u32, base_delay: Duration) -> Self {
        Self {
            current_rate: max_rate,
            min_rate,
            max_rate,
            success_streak: 0,
            error_streak: 0,
            backoff_multiplier: 1,
            base_delay,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &LookupSettings) -> Self {
        Self::new(
            settings.min_rate,
            settings.max_rate,
            Duration::from_millis(settings.base_backoff_ms),
        )
    }

    /// Current rate in requests per second.
    #[must_use]
    pub const fn current_rate(&self) -> u32 {
        self.current_rate
    }

    /// Records a successful lookup. Every five consecutive successes bump
    /// the rate by one, capped at the maximum. Clears the error streak
    /// and the backoff multiplier.
    pub fn record_success(&mut self) {
        self.success_streak += 1;
        self.error_streak = 0;
        self.reset_backoff();

        if self.success_streak >= SUCCESS_STREAK_STEP {
            self.success_streak = 0;
            if self.current_rate < self.max_rate {
                self.current_rate += 1;
                debug!("Rate increased to {}/sec", self.current_rate);
            }
        }
    }

    /// Records a failed lookup. A throttled error drops the rate by two
    /// (floored at the minimum) and doubles the backoff per consecutive
    /// error, capped at 2^4.
    pub fn record_error(&mut self, throttled: bool) {
        self.error_streak += 1;
        self.success_streak = 0;

        if throttled {
            self.current_rate = self
                .current_rate
                .saturating_sub(THROTTLE_RATE_DROP)
                .max(self.min_rate);
            self.backoff_multiplier = 2_u32.pow(self.error_streak.min(MAX_BACKOFF_EXPONENT));
            warn!(
                "Throttled; rate dropped to {}/sec, backoff x{}",
                self.current_rate, self.backoff_multiplier
            );
        }
    }

    /// Resets the backoff multiplier to 1.
    pub fn reset_backoff(&mut self) {
        self.backoff_multiplier = 1;
    }

    /// Spacing before the next request: the larger of the rate interval
    /// and the backed-off base delay, plus jitter uniform in
    /// [0, 20% of the interval).
    #[must_use]
    pub fn delay(&self) -> Duration {
        let interval_ms = 1000.0 / f64::from(self.current_rate);
        let backoff_ms = self.base_delay.as_millis() as f64 * f64::from(self.backoff_multiplier);
        let jitter_ms = rand::thread_rng().gen_range(0.0..interval_ms * 0.2);
        Duration::from_millis((interval_ms.max(backoff_ms) + jitter_ms) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(3, 10, Duration::from_millis(100))
    }

    #[test]
    fn test_starts_at_max_rate() {
        assert_eq!(limiter().current_rate(), 10);
    }

    #[test]
    fn test_five_successes_step_rate_up() {
        let mut rate = limiter();
        rate.record_error(true);
        rate.record_error(true);
        assert_eq!(rate.current_rate(), 6);

        for _ in 0..4 {
            rate.record_success();
        }
        assert_eq!(rate.current_rate(), 6);
        rate.record_success();
        assert_eq!(rate.current_rate(), 7);

        // Streak restarts after a step.
        for _ in 0..5 {
            rate.record_success();
        }
        assert_eq!(rate.current_rate(), 8);
    }

    #[test]
    fn test_throttle_drops_rate_by_two_and_doubles_backoff() {
        let mut rate = limiter();
        rate.record_error(true);
        assert_eq!(rate.current_rate(), 8);

        // Backoff multiplier is now 2: delay = max(1000/8, 100*2) plus
        // at most 20% of the 125ms interval in jitter.
        let delay = rate.delay();
        assert!(delay >= Duration::from_millis(200));
        assert!(delay < Duration::from_millis(225));

        rate.record_error(true);
        assert_eq!(rate.current_rate(), 6);
    }

    #[test]
    fn test_rate_stays_within_bounds() {
        let mut rate = limiter();
        for _ in 0..20 {
            rate.record_error(true);
            assert!(rate.current_rate() >= 3);
        }
        assert_eq!(rate.current_rate(), 3);

        for _ in 0..200 {
            rate.record_success();
            assert!(rate.current_rate() <= 10);
        }
        assert_eq!(rate.current_rate(), 10);
    }

    #[test]
    fn test_non_throttled_error_keeps_rate() {
        let mut rate = limiter();
        rate.record_error(false);
        assert_eq!(rate.current_rate(), 10);
    }

    #[test]
    fn test_error_interrupts_success_streak() {
        let mut rate = limiter();
        rate.record_error(true);
        rate.record_error(true);

        for _ in 0..4 {
            rate.record_success();
        }
        rate.record_error(false);
        for _ in 0..4 {
            rate.record_success();
        }
        // The streak restarted after the error, so no step yet.
        assert_eq!(rate.current_rate(), 6);
        rate.record_success();
        assert_eq!(rate.current_rate(), 7);
    }

    #[test]
    fn test_backoff_caps_and_resets() {
        let mut rate = limiter();
        for _ in 0..10 {
            rate.record_error(true);
        }
        // 2^min(10, 4) = 16 on a 100ms base.
        let delay = rate.delay();
        assert!(delay >= Duration::from_millis(1600));

        rate.record_success();
        // Backoff cleared; delay falls back to the rate interval
        // (1000/3 = 333ms) plus at most 20% jitter.
        let delay = rate.delay();
        assert!(delay >= Duration::from_millis(333));
        assert!(delay < Duration::from_millis(400));
    }

    #[test]
    fn test_delay_carries_jitter_within_bounds() {
        let rate = limiter();
        // 10/sec interval is 100ms; jitter adds up to 20ms.
        for _ in 0..100 {
            let delay = rate.delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(120));
        }
    }
}
