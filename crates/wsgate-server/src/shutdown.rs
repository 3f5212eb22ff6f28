//! Graceful shutdown coordination.
//!
//! A process-wide token is set exactly once by a termination signal. The
//! worker loop observes it, stops accepting, sends close frames, and drains
//! for a bounded grace period before force-closing what remains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Process-wide shutdown flag. Cheap to clone and check.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token. Returns true only for the first caller.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Install SIGINT/SIGTERM handling that sets the token.
pub fn install_signal_handler(token: ShutdownToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if token.trigger() {
            log::info!("Termination signal received, shutting down");
        }
    })
}

/// Bounded drain window for in-flight work during shutdown.
#[derive(Debug, Clone, Copy)]
pub struct GracePeriod {
    deadline: Instant,
}

impl GracePeriod {
    pub fn starting_now(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
        }
    }

    /// Whether the grace period has elapsed.
    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Time left before the deadline, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_once() {
        let token = ShutdownToken::new();
        assert!(!token.is_set());
        assert!(token.trigger());
        assert!(token.is_set());
        assert!(!token.trigger());
        assert!(token.is_set());
    }

    #[test]
    fn test_clones_share_state() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        token.trigger();
        assert!(clone.is_set());
    }

    #[test]
    fn test_grace_period_expiry() {
        let start = Instant::now();
        let grace = GracePeriod::starting_now(Duration::from_secs(2));

        assert!(!grace.expired(start));
        assert!(grace.remaining(start) > Duration::from_secs(1));
        let after = start + Duration::from_secs(3);
        assert!(grace.expired(after));
        assert_eq!(grace.remaining(after), Duration::ZERO);
    }
}
