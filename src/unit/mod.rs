//! Execution units: isolated contexts that run one job at a time.
//!
//! Both pool strategies are written against [`ExecutionUnit`]. A unit accepts
//! requests through [`ExecutionUnit::send`] and reports everything else as
//! [`UnitEvent`]s on the coordinator's channel:
//!
//! ```text
//!                 send(Request)
//!   Coordinator ─────────────────▶ unit (process | thread)
//!        ▲                               │
//!        └──── Message / Invalid / Error / Exit ────┘
//! ```
//!
//! Events carry the unit id. Ids are never reused, so events from a unit the
//! coordinator already retired are recognised and dropped.

pub mod process;
pub mod signals;
pub mod thread;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{Request, Response, SerializedError};
use crate::worker::Handler;

pub use process::ProcessBackend;
pub use signals::TerminationReason;
pub use thread::ThreadBackend;

/// Coordinator-assigned unit id.
pub type UnitId = u64;

/// Lifecycle state of a unit as tracked by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Alive with no job (persistent pools only).
    Idle,
    /// Running a job.
    Busy,
    /// Asked to stop; no further jobs.
    Terminating,
    /// Gone.
    Dead,
}

/// Something observed about a unit.
#[derive(Debug)]
pub enum UnitSignal {
    /// A well-formed response.
    Message(Response),
    /// Output that does not match the protocol.
    Invalid(String),
    /// Native failure outside of a response (broken pipe, panic).
    Error(SerializedError),
    /// The backing context is gone.
    Exit(TerminationReason),
}

/// A signal tagged with the unit it came from.
#[derive(Debug)]
pub struct UnitEvent {
    pub unit_id: UnitId,
    pub signal: UnitSignal,
}

/// Channel on which units report to the coordinator.
pub type UnitEventSender = mpsc::UnboundedSender<UnitEvent>;

/// One isolated execution context.
pub trait ExecutionUnit: Send {
    /// Coordinator-assigned id.
    fn id(&self) -> UnitId;

    /// Backing kind, for logging.
    fn kind(&self) -> &'static str;

    /// Hand a request to the context.
    fn send(&mut self, request: Request) -> Result<()>;

    /// Tear the context down immediately.
    fn terminate(&mut self);

    /// Let the context finish on its own within `grace`, then tear it down.
    fn stop(&mut self, grace: Duration);
}

/// How execution units are created.
#[derive(Clone)]
pub enum Backend {
    /// Each unit is a child process speaking the line protocol.
    Process(ProcessBackend),
    /// Each unit is a dedicated OS thread running an in-process handler.
    Thread(ThreadBackend),
}

impl Backend {
    /// Process units running `program`.
    pub fn process(program: impl Into<std::path::PathBuf>) -> Self {
        Self::Process(ProcessBackend::new(program))
    }

    /// Thread units running `handler`.
    pub fn thread<H: Handler>(handler: H) -> Self {
        Self::Thread(ThreadBackend::new(Arc::new(handler)))
    }

    /// Spawn one unit.
    pub(crate) fn spawn(
        &self,
        id: UnitId,
        worker_data: &Value,
        events: UnitEventSender,
    ) -> Result<Box<dyn ExecutionUnit>> {
        match self {
            Self::Process(backend) => Ok(Box::new(backend.spawn(id, worker_data, events)?)),
            Self::Thread(backend) => Ok(Box::new(backend.spawn(id, worker_data, events)?)),
        }
    }

    /// Backing kind, for logging and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            Self::Thread(_) => "thread",
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(backend) => f.debug_tuple("Process").field(backend).finish(),
            Self::Thread(backend) => f.debug_tuple("Thread").field(backend).finish(),
        }
    }
}

impl From<ProcessBackend> for Backend {
    fn from(backend: ProcessBackend) -> Self {
        Self::Process(backend)
    }
}

impl From<ThreadBackend> for Backend {
    fn from(backend: ThreadBackend) -> Self {
        Self::Thread(backend)
    }
}
