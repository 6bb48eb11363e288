//! forkpool - run jobs in isolated worker processes or threads.
//!
//! A [`WorkerPool`] runs caller-supplied jobs inside isolated execution units
//! so a slow or crashing job never blocks or corrupts the caller:
//!
//! - [`PoolMode::Ephemeral`] spawns a fresh unit for every job;
//! - [`PoolMode::Persistent`] keeps a fixed set of reusable units and
//!   replaces crashed ones within a [`RestartPolicy`] budget.
//!
//! Units are either child processes speaking newline-delimited JSON (see
//! [`protocol`] and [`worker::run_worker`]) or dedicated threads running a
//! [`worker::Handler`] in-process.

mod config;
mod error;
pub mod logging;
mod pool;
pub mod protocol;
pub mod unit;
pub mod worker;

pub use config::{DEFAULT_SHUTDOWN_GRACE, PoolConfig, PoolMode, RestartPolicy};
pub use error::{PoolError, Result};
pub use pool::{JobHandle, JobId, PoolStats, SubmitOptions, WorkerPool};
pub use protocol::{Request, Response, SerializedError};
pub use unit::{Backend, ProcessBackend, TerminationReason, ThreadBackend};
pub use worker::{Handler, WorkerContext};

pub use tokio_util::sync::CancellationToken;
