// ABOUTME: Load classification and the decay / idle-reap state machine
//
// The monitor loop feeds a LoadTracker one observation per tick. The tracker
// owns the timers and answers what the connection should do next, so the
// timing rules can be exercised with a simulated clock.

use std::time::Duration;

use tokio::time::Instant;

/// How busy a connection is, derived from its load ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoadClass {
    /// Fewer than 10 ticks
    Idle,
    /// 10 to 19 ticks
    Normal,
    /// 20 to 999 ticks
    Busy,
    /// 1000 ticks or more; never handed out by the pool
    Overloaded,
}

impl LoadClass {
    /// Classes the pool may reuse, in order of preference
    pub const REUSABLE: [Self; 3] = [Self::Idle, Self::Normal, Self::Busy];

    /// Classify a tick count
    pub const fn from_ticks(ticks: u64) -> Self {
        match ticks {
            0..=9 => Self::Idle,
            10..=19 => Self::Normal,
            20..=999 => Self::Busy,
            _ => Self::Overloaded,
        }
    }
}

impl std::fmt::Display for LoadClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Normal => "normal",
            Self::Busy => "busy",
            Self::Overloaded => "overloaded",
        };
        f.write_str(name)
    }
}

/// Action requested by the tracker for one monitor tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadVerdict {
    /// Nothing to do
    Hold,
    /// Shed one load tick
    Decay,
    /// Connection has been idle long enough to close
    Reap,
}

/// Timer state carried across monitor ticks
#[derive(Debug, Clone)]
pub struct LoadTracker {
    decay_interval: Duration,
    idle_timeout: Duration,
    last_ticks: u64,
    ticks_changed_at: Instant,
    last_busy: usize,
    busy_changed_at: Instant,
}

impl LoadTracker {
    /// Start tracking at `now` with zero ticks and zero busy interfaces
    pub const fn new(decay_interval: Duration, idle_timeout: Duration, now: Instant) -> Self {
        Self {
            decay_interval,
            idle_timeout,
            last_ticks: 0,
            ticks_changed_at: now,
            last_busy: 0,
            busy_changed_at: now,
        }
    }

    /// Feed one observation
    ///
    /// `busy` is only consulted once the tick count has settled at zero, so
    /// callers may compute it lazily through the closure.
    pub fn observe(&mut self, ticks: u64, busy: impl FnOnce() -> usize, now: Instant) -> LoadVerdict {
        if ticks != self.last_ticks {
            self.last_ticks = ticks;
            self.ticks_changed_at = now;
            self.busy_changed_at = now;
            return LoadVerdict::Hold;
        }

        if ticks > 0 {
            if now.duration_since(self.ticks_changed_at) >= self.decay_interval {
                return LoadVerdict::Decay;
            }
            return LoadVerdict::Hold;
        }

        let busy = busy();
        if busy != self.last_busy {
            self.last_busy = busy;
            self.busy_changed_at = now;
            LoadVerdict::Hold
        } else if now.duration_since(self.busy_changed_at) >= self.idle_timeout {
            LoadVerdict::Reap
        } else {
            LoadVerdict::Hold
        }
    }

    /// Record the tick count after a decay step
    pub fn decayed(&mut self, ticks: u64, now: Instant) {
        self.last_ticks = ticks;
        self.ticks_changed_at = now;
        self.busy_changed_at = now;
    }
}
