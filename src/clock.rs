//! Injected time source and debounce gate
//!
//! Flush scheduling (live-mode index flushes, private-index snapshot saves)
//! is driven by an injected clock so tests can advance time manually instead
//! of sleeping on the wall clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonic-enough millisecond clock.
pub trait Clock {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Wall-clock time. The default for production use.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock starting at `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Advance the clock by `delta` milliseconds.
    pub fn advance(&self, delta: u64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Gate that coalesces a burst of flush requests into at most one durable
/// write per window.
///
/// Callers ask `request` on every trigger; a `true` answer means "write
/// now", a `false` answer leaves the request pending. Pending requests are
/// absorbed by the next granted fire, or drained explicitly at close time
/// via `take_pending`.
#[derive(Debug)]
pub struct Debounce {
    window_millis: u64,
    last_fire: Option<u64>,
    pending: bool,
}

impl Debounce {
    /// Create a gate with the given coalescing window.
    pub fn new(window_millis: u64) -> Self {
        Self {
            window_millis,
            last_fire: None,
            pending: false,
        }
    }

    /// Request a fire at time `now`. Returns true when the caller should
    /// perform the write immediately.
    pub fn request(&mut self, now: u64) -> bool {
        match self.last_fire {
            Some(last) if now.saturating_sub(last) < self.window_millis => {
                self.pending = true;
                false
            }
            _ => {
                self.last_fire = Some(now);
                self.pending = false;
                true
            }
        }
    }

    /// Whether a request was absorbed without firing since the last grant.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Drain the pending flag. Returns true when a write is still owed.
    pub fn take_pending(&mut self) -> bool {
        std::mem::replace(&mut self.pending, false)
    }
}
