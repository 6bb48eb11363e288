//! Thread-backed execution units.
//!
//! Each unit is a dedicated OS thread running the handler in-process. Requests
//! arrive over a std channel; responses are reported on the coordinator's
//! event channel. A panicking handler is caught and reported as a crash.
//!
//! Threads cannot be killed. Terminating a thread unit closes its request
//! channel and abandons it: a handler that is still running finishes in the
//! background and anything it reports afterwards is dropped by the
//! coordinator, since the unit id is never reused.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use serde_json::Value;

use super::{ExecutionUnit, TerminationReason, UnitEvent, UnitEventSender, UnitId, UnitSignal};
use crate::error::{PoolError, Result};
use crate::protocol::{Request, SerializedError};
use crate::worker::{self, Handler, WorkerContext};

/// Configuration for spawning worker threads.
#[derive(Clone)]
pub struct ThreadBackend {
    handler: Arc<dyn Handler>,
    stack_size: Option<usize>,
}

impl ThreadBackend {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            handler,
            stack_size: None,
        }
    }

    /// Stack size for each worker thread.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub(crate) fn spawn(
        &self,
        id: UnitId,
        worker_data: &Value,
        events: UnitEventSender,
    ) -> Result<ThreadUnit> {
        let (requests, inbox) = mpsc::channel::<Request>();
        let handler = self.handler.clone();
        let ctx = WorkerContext::new(Some(id), worker_data.clone());

        let mut builder = std::thread::Builder::new().name(format!("forkpool-unit-{}", id));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        builder
            .spawn(move || unit_loop(id, handler, ctx, inbox, events))
            .map_err(|e| PoolError::Spawn(format!("thread: {}", e)))?;

        tracing::debug!(unit_id = id, "Spawned worker thread");

        Ok(ThreadUnit {
            id,
            requests: Some(requests),
        })
    }
}

impl fmt::Debug for ThreadBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadBackend")
            .field("stack_size", &self.stack_size)
            .finish_non_exhaustive()
    }
}

/// Handle to a worker thread.
pub struct ThreadUnit {
    id: UnitId,
    requests: Option<mpsc::Sender<Request>>,
}

impl ExecutionUnit for ThreadUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "thread"
    }

    fn send(&mut self, request: Request) -> Result<()> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| PoolError::Spawn(format!("Worker {} is stopping", self.id)))?;
        requests.send(request).map_err(|_| PoolError::WorkerCrash {
            unit_id: self.id,
            reason: "worker thread is gone".to_string(),
            error: None,
        })
    }

    fn terminate(&mut self) {
        if self.requests.take().is_some() {
            tracing::trace!(unit_id = self.id, "Abandoning worker thread");
        }
    }

    fn stop(&mut self, _grace: Duration) {
        // The loop exits once the current job, if any, returns.
        self.requests = None;
    }
}

fn unit_loop(
    id: UnitId,
    handler: Arc<dyn Handler>,
    ctx: WorkerContext,
    inbox: mpsc::Receiver<Request>,
    events: UnitEventSender,
) {
    let emit = |signal| events.send(UnitEvent { unit_id: id, signal }).is_ok();

    while let Ok(request) = inbox.recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            worker::invoke(handler.as_ref(), request.payload, &ctx)
        }));

        match outcome {
            Ok(response) => {
                if !emit(UnitSignal::Message(response)) {
                    return;
                }
            }
            Err(panic) => {
                let error = SerializedError::new("Panic", panic_message(panic.as_ref()));
                emit(UnitSignal::Error(error));
                emit(UnitSignal::Exit(TerminationReason::Panicked));
                return;
            }
        }
    }

    emit(UnitSignal::Exit(TerminationReason::Exited(0)));
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "handler panicked".to_string()
    }
}
