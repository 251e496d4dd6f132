//! Per-identifier window counter.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// A budget counter for one identifier over one time slice.
///
/// The identifier and expiration never change after creation. A window whose
/// slice has elapsed is replaced by a fresh one rather than reset, so the only
/// mutable state is the remaining count, which is updated atomically and can
/// be shared between readers holding the limiter's shared lock.
#[derive(Debug)]
pub struct Window {
    /// The identifier this window belongs to
    identifier: String,
    /// When this window's budget resets
    expires_at: Instant,
    /// Remaining operations; negative values record how far over budget the
    /// identifier has gone
    remaining: AtomicI64,
}

impl Window {
    /// Create a window for `identifier` whose first operation has already
    /// been consumed.
    pub fn new(identifier: impl Into<String>, expires_at: Instant, max_count: i64) -> Self {
        Self {
            identifier: identifier.into(),
            expires_at,
            remaining: AtomicI64::new(max_count.saturating_sub(1)),
        }
    }

    /// Atomically consume one operation and return the remaining count.
    pub fn decrement(&self) -> i64 {
        self.remaining.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Read the remaining count without consuming.
    pub fn peek(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Whether the slice has elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    /// The identifier this window tracks.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// When this window's budget resets.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Get the duration until this window resets.
    pub fn time_until_reset(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_window_accounts_for_creating_call() {
        let window = Window::new("a", Instant::now() + Duration::from_secs(60), 10);

        assert_eq!(window.identifier(), "a");
        assert_eq!(window.peek(), 9);
    }

    #[test]
    fn test_decrement_goes_negative() {
        let window = Window::new("a", Instant::now() + Duration::from_secs(60), 2);

        assert_eq!(window.decrement(), 0);
        assert_eq!(window.decrement(), -1);
        assert_eq!(window.decrement(), -2);
        assert_eq!(window.peek(), -2);
    }

    #[test]
    fn test_zero_budget_starts_over_limit() {
        let window = Window::new("a", Instant::now() + Duration::from_secs(60), 0);
        assert_eq!(window.peek(), -1);
    }

    #[test]
    fn test_expiry() {
        let now = Instant::now();
        let window = Window::new("a", now + Duration::from_millis(50), 1);

        assert!(!window.is_expired(now));
        // Expiry is strict: the exact deadline still belongs to the window.
        assert!(!window.is_expired(now + Duration::from_millis(50)));
        assert!(window.is_expired(now + Duration::from_millis(51)));
    }

    #[test]
    fn test_time_until_reset() {
        let now = Instant::now();
        let window = Window::new("a", now + Duration::from_secs(30), 1);

        assert_eq!(window.time_until_reset(now), Duration::from_secs(30));
        assert_eq!(window.time_until_reset(now + Duration::from_secs(31)), Duration::ZERO);
    }

    #[test]
    fn test_concurrent_decrements_are_linearized() {
        let window = Window::new("a", Instant::now() + Duration::from_secs(60), 1001);
        let mut seen: Vec<i64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| (0..125).map(|_| window.decrement()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
        assert_eq!(window.peek(), 0);
    }
}
