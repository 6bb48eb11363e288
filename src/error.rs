//! Error types for forkpool.
//!
//! Every job settles with either a value or exactly one [`PoolError`].

use std::time::Duration;

use thiserror::Error;

use crate::protocol::SerializedError;

/// Main error type for forkpool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Job timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Job was aborted")]
    Aborted,

    #[error("Job drained from queue: {0}")]
    Drained(String),

    #[error("Pool is shutting down: {0}")]
    ShuttingDown(String),

    #[error("Worker {unit_id} crashed: {reason}")]
    WorkerCrash {
        unit_id: u64,
        reason: String,
        error: Option<SerializedError>,
    },

    #[error("Worker {unit_id} sent an invalid message: {message}")]
    InvalidMessage { unit_id: u64, message: String },

    #[error("Handler failed: {0}")]
    Handler(SerializedError),

    #[error("No workers left: restart budget exhausted")]
    PoolExhausted,

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Invalid pool configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PoolError {
    /// Error class name as reported to callers and in CLI output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "TimeoutError",
            Self::Aborted => "AbortError",
            Self::Drained(_) => "PoolDrainedError",
            Self::ShuttingDown(_) => "PoolShutdownError",
            Self::WorkerCrash { .. } => "WorkerCrashError",
            Self::InvalidMessage { .. } => "InvalidMessageError",
            Self::Handler(_) => "HandlerError",
            Self::PoolExhausted | Self::Spawn(_) | Self::Config(_) | Self::Io(_) | Self::Json(_) => {
                "PoolError"
            }
        }
    }

    /// The worker-side error carried by this failure, if any.
    pub fn worker_error(&self) -> Option<&SerializedError> {
        match self {
            Self::Handler(err) => Some(err),
            Self::WorkerCrash { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    /// Serializable form for reporting, nesting the worker-side error when present.
    pub fn to_serialized(&self) -> SerializedError {
        let serialized = SerializedError::new(self.name(), self.to_string());
        match self.worker_error() {
            Some(inner) => {
                let mut stack = inner.to_string();
                if let Some(trace) = &inner.stack {
                    stack.push('\n');
                    stack.push_str(trace);
                }
                serialized.with_stack(stack)
            }
            None => serialized,
        }
    }
}

/// Result type alias for forkpool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
