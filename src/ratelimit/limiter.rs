//! Core time-slice limiter implementation.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, error, trace};

use super::window::Window;
use crate::config::LimiterConfig;

/// Extra sleep added to each reclamation delay to absorb timer imprecision.
const RECLAIM_SLACK: Duration = Duration::from_millis(1);

/// Name given to the background reclamation thread.
const RECLAIMER_THREAD_NAME: &str = "slice-reclaimer";

/// Limits the number of operations per identifier per time slice.
///
/// It does not control the pace of operations within a slice: a limiter that
/// allows 50 operations per hour will accept 49 of them in the first second,
/// as long as no more than one further operation arrives in the same hour.
///
/// Expired windows are removed by a background thread that is started when
/// the first window is created and exits once nothing is tracked, so an idle
/// limiter costs no CPU. Cloning the limiter yields another handle to the
/// same state.
#[derive(Clone)]
pub struct SliceLimiter {
    shared: Arc<Shared>,
}

struct Shared {
    /// Length of every window
    window_duration: Duration,
    /// Budget per window
    max_count: i64,
    /// Index, eviction queue and reclaimer flag, guarded together
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    /// Live window per identifier
    index: HashMap<String, Arc<Window>>,
    /// Windows in creation order, which is also expiration order
    queue: VecDeque<Arc<Window>>,
    /// Whether a reclamation thread is running
    reclaim_active: bool,
}

/// Snapshot of an identifier's budget, used for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Budget per window
    pub limit: i64,
    /// Remaining operations in the current window (may be negative)
    pub remaining: i64,
    /// Time until the current window resets
    pub reset_in: Duration,
}

impl SliceLimiter {
    /// Create a limiter granting `max_count` operations per `window_duration`.
    ///
    /// `window_duration` must be non-zero. A `max_count` of zero or less
    /// rejects every operation.
    pub fn new(window_duration: Duration, max_count: i64) -> Self {
        Self {
            shared: Arc::new(Shared {
                window_duration,
                max_count,
                state: RwLock::new(State::default()),
            }),
        }
    }

    /// Create a limiter from configuration.
    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(config.window_duration(), config.max_count)
    }

    /// Length of each time slice.
    pub fn window_duration(&self) -> Duration {
        self.shared.window_duration
    }

    /// Budget per time slice.
    pub fn max_count(&self) -> i64 {
        self.shared.max_count
    }

    /// Get the number of operations `id` may still perform in the current
    /// slice without consuming any.
    ///
    /// Identifiers with no live window report the full budget. The value may
    /// be negative once the budget is exhausted.
    pub fn query(&self, id: &str) -> i64 {
        let now = Instant::now();
        let state = self.shared.state.read();
        match state.index.get(id) {
            Some(window) if !window.is_expired(now) => window.peek(),
            _ => self.shared.max_count,
        }
    }

    /// Get the budget status of `id` without consuming.
    pub fn status(&self, id: &str) -> QuotaStatus {
        let now = Instant::now();
        let state = self.shared.state.read();
        match state.index.get(id) {
            Some(window) if !window.is_expired(now) => QuotaStatus {
                limit: self.shared.max_count,
                remaining: window.peek(),
                reset_in: window.time_until_reset(now),
            },
            _ => QuotaStatus {
                limit: self.shared.max_count,
                remaining: self.shared.max_count,
                reset_in: self.shared.window_duration,
            },
        }
    }

    /// Consume one operation for `id`.
    ///
    /// Returns `true` if `id` is still within its budget for the current
    /// slice, `false` if it has gone over.
    pub fn consume(&self, id: &str) -> bool {
        self.decrement(id) >= 0
    }

    /// Consume one operation for `id` and return the remaining count.
    pub fn decrement(&self, id: &str) -> i64 {
        self.charge(id).0
    }

    /// Consume one operation for `id` and report the status of the window
    /// that was charged.
    pub fn consume_status(&self, id: &str) -> QuotaStatus {
        let (remaining, reset_in) = self.charge(id);
        QuotaStatus {
            limit: self.shared.max_count,
            remaining,
            reset_in,
        }
    }

    /// Decrement the live window for `id`, creating one if needed.
    ///
    /// Returns the remaining count and the time until that same window resets.
    fn charge(&self, id: &str) -> (i64, Duration) {
        {
            let state = self.shared.state.read();
            if let Some(window) = state.index.get(id) {
                let now = Instant::now();
                if !window.is_expired(now) {
                    let remaining = window.decrement();
                    trace!(id = %id, remaining = remaining, "Consumed from live window");
                    return (remaining, window.time_until_reset(now));
                }
            }
        }

        let mut state = self.shared.state.write();

        // Another caller may have created a fresh window while the lock was released.
        let now = Instant::now();
        if let Some(window) = state.index.get(id) {
            if !window.is_expired(now) {
                return (window.decrement(), window.time_until_reset(now));
            }
        }

        // Expiration is taken under the exclusive lock so queue order matches expiration order.
        let window = Arc::new(Window::new(
            id,
            now + self.shared.window_duration,
            self.shared.max_count,
        ));
        let remaining = window.peek();

        debug!(
            id = %id,
            max_count = self.shared.max_count,
            window = ?self.shared.window_duration,
            "Creating new time slice window"
        );

        state.push(window);

        if !state.reclaim_active {
            start_reclaimer(&self.shared, &mut state, spawn_reclaimer);
        }

        (remaining, self.shared.window_duration)
    }

    /// Get the number of identifiers with a tracked window.
    pub fn tracked_count(&self) -> usize {
        self.shared.state.read().index.len()
    }

    /// Whether the background reclamation thread is running.
    pub fn is_reclaiming(&self) -> bool {
        self.shared.state.read().reclaim_active
    }
}

impl std::fmt::Debug for SliceLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceLimiter")
            .field("window_duration", &self.shared.window_duration)
            .field("max_count", &self.shared.max_count)
            .finish_non_exhaustive()
    }
}

impl State {
    /// Register a window as the newest entry.
    fn push(&mut self, window: Arc<Window>) {
        if let Some(newest) = self.queue.back() {
            assert!(
                newest.expires_at() <= window.expires_at(),
                "time slice queue out of order: {} expires after {}",
                newest.identifier(),
                window.identifier()
            );
        }
        self.index.insert(window.identifier().to_string(), Arc::clone(&window));
        self.queue.push_back(window);
    }

    /// Drop every window at the front of the queue that has expired at `now`.
    fn evict_expired(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while self.queue.front().is_some_and(|w| w.is_expired(now)) {
            let Some(oldest) = self.queue.pop_front() else {
                break;
            };
            // Only unregister if a caller has not already replaced this window.
            if self
                .index
                .get(oldest.identifier())
                .is_some_and(|current| Arc::ptr_eq(current, &oldest))
            {
                self.index.remove(oldest.identifier());
            }
            evicted += 1;
        }
        evicted
    }
}

impl Shared {
    /// Run one reclamation pass.
    ///
    /// Returns how long to sleep before the next pass, or `None` once nothing
    /// is tracked, in which case the reclaimer flag has been cleared and the
    /// caller must exit.
    fn sweep(&self, now: Instant) -> Option<Duration> {
        let mut state = self.state.write();
        let evicted = state.evict_expired(now);

        match state.queue.front() {
            Some(oldest) => {
                let delay = oldest.time_until_reset(now);
                trace!(evicted = evicted, tracked = state.index.len(), delay = ?delay, "Reclamation pass");
                Some(delay)
            }
            None => {
                // Every indexed window is queued, so an empty queue means an empty index.
                assert!(
                    state.index.is_empty(),
                    "time slice index holds {} windows with an empty queue",
                    state.index.len()
                );
                state.reclaim_active = false;
                debug!(evicted = evicted, "Nothing left to reclaim, stopping reclaimer");
                None
            }
        }
    }
}

/// Start the reclamation thread. Must be called with the exclusive lock held.
///
/// A limiter that holds windows without a reclaimer grows without bound, so
/// failing to start one is fatal.
fn start_reclaimer<F>(shared: &Arc<Shared>, state: &mut State, spawn: F)
where
    F: FnOnce(Weak<Shared>) -> io::Result<()>,
{
    if let Err(e) = spawn(Arc::downgrade(shared)) {
        error!(error = %e, tracked = state.index.len(), "Failed to spawn time slice reclaimer");
        panic!("failed to spawn time slice reclaimer: {}", e);
    }
    state.reclaim_active = true;
    debug!("Started time slice reclaimer");
}

fn spawn_reclaimer(shared: Weak<Shared>) -> io::Result<()> {
    thread::Builder::new()
        .name(RECLAIMER_THREAD_NAME.to_string())
        .spawn(move || reclaim_loop(shared))
        .map(drop)
}

fn reclaim_loop(shared: Weak<Shared>) {
    loop {
        // The limiter may have been dropped while we slept.
        let Some(strong) = shared.upgrade() else {
            return;
        };
        let Some(delay) = strong.sweep(Instant::now()) else {
            return;
        };
        drop(strong);

        thread::sleep(delay + RECLAIM_SLACK);
    }
}
