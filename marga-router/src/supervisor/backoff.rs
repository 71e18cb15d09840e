//! Retry delay between reconnect attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::ReconnectConfig;

/// Granularity at which sleeping loops notice shutdown.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Reconnect delay: fixed by default, optionally growing geometrically.
#[derive(Debug, Clone)]
pub struct RetryDelay {
    base: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
}

impl RetryDelay {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            multiplier: multiplier.max(1.0),
            attempt: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.delay(), config.backoff_multiplier, config.max_delay())
    }

    /// Delay before the next attempt: `base * multiplier^attempt`, capped.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.powi(self.attempt.min(i32::MAX as u32) as i32);
        self.attempt = self.attempt.saturating_add(1);

        let scaled_ms = self.base.as_millis() as f64 * factor;
        if !scaled_ms.is_finite() || scaled_ms >= self.max.as_millis() as f64 {
            self.max
        } else {
            Duration::from_millis(scaled_ms as u64)
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Sleep for `total`, waking early when `running` is cleared.
///
/// Returns the final value of `running`.
pub fn sleep_while_running(total: Duration, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !running.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_by_default() {
        let mut delay = RetryDelay::from_config(&ReconnectConfig::default());
        for _ in 0..5 {
            assert_eq!(delay.next_delay(), Duration::from_secs(5));
        }
        assert_eq!(delay.attempt(), 5);
    }

    #[test]
    fn test_growth_is_capped_and_resets() {
        let mut delay = RetryDelay::new(Duration::from_millis(100), 2.0, Duration::from_millis(500));

        assert_eq!(delay.next_delay(), Duration::from_millis(100));
        assert_eq!(delay.next_delay(), Duration::from_millis(200));
        assert_eq!(delay.next_delay(), Duration::from_millis(400));
        assert_eq!(delay.next_delay(), Duration::from_millis(500));
        assert_eq!(delay.next_delay(), Duration::from_millis(500));

        delay.reset();
        assert_eq!(delay.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_shrinking_multiplier_is_clamped() {
        let mut delay = RetryDelay::new(Duration::from_millis(50), 0.1, Duration::from_millis(10));
        assert_eq!(delay.next_delay(), Duration::from_millis(50));
        assert_eq!(delay.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_sleep_wakes_on_shutdown() {
        let running = AtomicBool::new(false);
        let start = Instant::now();
        assert!(!sleep_while_running(Duration::from_secs(10), &running));
        assert!(start.elapsed() < Duration::from_secs(1));

        let running = AtomicBool::new(true);
        assert!(sleep_while_running(Duration::from_millis(20), &running));
    }
}
