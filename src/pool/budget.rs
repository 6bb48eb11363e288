//! Rolling-window restart budget for persistent pools.

use std::time::Instant;

use crate::config::RestartPolicy;

/// Current restart window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    /// No restart since the last reset.
    Closed,
    /// Open until the given instant.
    Until(Instant),
    /// The window is too long to represent and never resets.
    Forever,
}

/// Counts crash-triggered restarts across the whole pool.
///
/// The window opens on the first restart after a reset and closes
/// `policy.window` later; the count is reset lazily when a failure is seen
/// after the window has closed.
#[derive(Debug)]
pub(crate) struct RestartBudget {
    policy: RestartPolicy,
    count: u32,
    window: Window,
    total: u64,
}

impl RestartBudget {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            count: 0,
            window: Window::Closed,
            total: 0,
        }
    }

    fn is_open(&self, now: Instant) -> bool {
        match self.window {
            Window::Closed => false,
            Window::Until(reset_at) => now < reset_at,
            Window::Forever => true,
        }
    }

    fn roll(&mut self, now: Instant) {
        if !self.is_open(now) {
            self.count = 0;
            self.window = now
                .checked_add(self.policy.window)
                .map_or(Window::Forever, Window::Until);
        }
    }

    /// Take one restart if the current window has room.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.roll(now);
        if self.count < self.policy.max_restarts {
            self.count += 1;
            self.total += 1;
            true
        } else {
            false
        }
    }

    /// Whether a failure at `now` would be refused a restart.
    pub fn is_exhausted(&self, now: Instant) -> bool {
        if self.is_open(now) {
            self.count >= self.policy.max_restarts
        } else {
            self.policy.max_restarts == 0
        }
    }

    /// Restarts granted over the pool's lifetime.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Restarts granted in the current window.
    pub fn count(&self) -> u32 {
        self.count
    }
}
