//! Pool configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PoolError, Result};
use crate::unit::Backend;

/// Default time a stopping unit gets to exit on its own.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Pool strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// One fresh unit per job.
    Ephemeral,
    /// Fixed set of reusable units.
    Persistent,
}

impl FromStr for PoolMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ephemeral" => Ok(Self::Ephemeral),
            "persistent" => Ok(Self::Persistent),
            _ => Err(format!(
                "Invalid pool mode: {}. Expected: ephemeral, persistent",
                s
            )),
        }
    }
}

impl fmt::Display for PoolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ephemeral => write!(f, "ephemeral"),
            Self::Persistent => write!(f, "persistent"),
        }
    }
}

/// Limits on crash-triggered restarts in a persistent pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts allowed per window, across the whole pool.
    pub max_restarts: u32,
    /// Length of the rolling window.
    pub window: Duration,
    /// Fixed delay before a replacement is spawned.
    pub delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(60),
            delay: Duration::ZERO,
        }
    }
}

impl RestartPolicy {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            delay: Duration::ZERO,
        }
    }

    /// Wait this long before spawning each replacement.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Configuration for a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How units are created.
    pub backend: Backend,
    /// Pool strategy.
    pub mode: PoolMode,
    /// Number of units (persistent only).
    pub workers: Option<usize>,
    /// Cap on simultaneous units (ephemeral only). Unbounded when unset.
    pub max_concurrency: Option<usize>,
    /// Timeout for jobs submitted without one.
    pub default_timeout: Option<Duration>,
    /// Restart limits (persistent only).
    pub restart: RestartPolicy,
    /// Opaque value delivered to every unit at spawn time.
    pub worker_data: Value,
    /// Time a unit gets to exit on its own during shutdown.
    pub shutdown_grace: Duration,
}

impl PoolConfig {
    /// A persistent pool of `workers` reusable units.
    pub fn persistent(backend: impl Into<Backend>, workers: usize) -> Self {
        Self::base(backend.into(), PoolMode::Persistent, Some(workers))
    }

    /// An ephemeral pool spawning one unit per job.
    pub fn ephemeral(backend: impl Into<Backend>) -> Self {
        Self::base(backend.into(), PoolMode::Ephemeral, None)
    }

    fn base(backend: Backend, mode: PoolMode, workers: Option<usize>) -> Self {
        Self {
            backend,
            mode,
            workers,
            max_concurrency: None,
            default_timeout: None,
            restart: RestartPolicy::default(),
            worker_data: Value::Null,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_worker_data(mut self, data: Value) -> Self {
        self.worker_data = data;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Check option combinations for the selected mode.
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            PoolMode::Persistent => {
                match self.workers {
                    Some(n) if n >= 1 => {}
                    _ => {
                        return Err(PoolError::Config(
                            "persistent pools need at least 1 worker".into(),
                        ));
                    }
                }
                if self.max_concurrency.is_some() {
                    return Err(PoolError::Config(
                        "max_concurrency applies to ephemeral pools only; use workers".into(),
                    ));
                }
                if self.restart.window.is_zero() {
                    return Err(PoolError::Config("restart window must be non-zero".into()));
                }
            }
            PoolMode::Ephemeral => {
                if self.workers.is_some() {
                    return Err(PoolError::Config(
                        "workers applies to persistent pools only; use max_concurrency".into(),
                    ));
                }
                if self.max_concurrency == Some(0) {
                    return Err(PoolError::Config("max_concurrency must be at least 1".into()));
                }
            }
        }
        Ok(())
    }

    /// Maximum number of jobs running at once, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        match self.mode {
            PoolMode::Persistent => self.workers,
            PoolMode::Ephemeral => self.max_concurrency,
        }
    }
}
