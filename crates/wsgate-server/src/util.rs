//! Utility types and helpers.

use std::time::{Duration, Instant};

/// A counter that rate-limits based on time intervals.
///
/// Accumulates counts and only signals "ready to log" after the interval
/// passes. Useful for rate-limiting log spam while preserving total counts.
#[derive(Debug)]
pub struct RateLimitedCounter {
    count: u64,
    last_reset: Instant,
    interval: Duration,
}

impl RateLimitedCounter {
    /// Create a new counter with the given interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            count: 0,
            last_reset: Instant::now(),
            interval,
        }
    }

    /// Increment by 1 and return Some(count) if interval has passed.
    /// Resets count and timestamp when returning Some.
    #[inline]
    pub fn increment(&mut self) -> Option<u64> {
        self.increment_by(1)
    }

    /// Increment by N and return Some(count) if interval has passed.
    /// Resets count and timestamp when returning Some.
    #[inline]
    pub fn increment_by(&mut self, n: u64) -> Option<u64> {
        self.count += n;

        if self.last_reset.elapsed() >= self.interval {
            let count = self.count;
            self.count = 0;
            self.last_reset = Instant::now();
            Some(count)
        } else {
            None
        }
    }

    /// Get current accumulated count without resetting.
    #[inline]
    #[allow(dead_code)]
    pub fn current_count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_increment_before_interval() {
        let mut counter = RateLimitedCounter::new(Duration::from_secs(10));
        assert!(counter.increment().is_none());
        assert!(counter.increment().is_none());
        assert_eq!(counter.current_count(), 2);
    }

    #[test]
    fn test_increment_after_interval() {
        let mut counter = RateLimitedCounter::new(Duration::ZERO);
        assert_eq!(counter.increment(), Some(1));
        assert_eq!(counter.increment(), Some(1));
    }

    #[test]
    fn test_accumulation() {
        let mut counter = RateLimitedCounter::new(Duration::from_secs(1));
        counter.increment();
        counter.increment();
        counter.increment();
        assert_eq!(counter.current_count(), 3);

        sleep(Duration::from_millis(1100));
        assert_eq!(counter.increment(), Some(4));
        assert_eq!(counter.current_count(), 0);
    }
}
