//! Jobs and the FIFO queue of undispatched jobs.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Caller-visible job id, unique per pool.
pub type JobId = u64;

/// One submitted unit of work and its completion handle.
pub(crate) struct Job {
    pub id: JobId,
    /// Taken when the job is sent to a unit.
    pub payload: Option<Value>,
    pub created_at: Instant,
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
    reply: Option<oneshot::Sender<Result<Value>>>,
    /// Deadline and cancellation watchers, aborted on settle.
    guards: Vec<AbortHandle>,
}

impl Job {
    pub fn new(
        id: JobId,
        payload: Value,
        timeout: Option<Duration>,
        cancellation: Option<CancellationToken>,
        reply: oneshot::Sender<Result<Value>>,
    ) -> Self {
        Self {
            id,
            payload: Some(payload),
            created_at: Instant::now(),
            timeout,
            cancellation,
            reply: Some(reply),
            guards: Vec::new(),
        }
    }

    /// Whether the caller has already cancelled this job.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Tie a watcher task's lifetime to this job.
    pub fn watch(&mut self, guard: AbortHandle) {
        self.guards.push(guard);
    }

    /// Deliver the outcome. Returns `false` if the job was already settled.
    pub fn settle(&mut self, outcome: Result<Value>) -> bool {
        let Some(reply) = self.reply.take() else {
            return false;
        };
        for guard in self.guards.drain(..) {
            guard.abort();
        }
        // The caller may have dropped its handle.
        let _ = reply.send(outcome);
        true
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        for guard in self.guards.drain(..) {
            guard.abort();
        }
    }
}

/// Strict FIFO of jobs waiting for a unit.
#[derive(Default)]
pub(crate) struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    pub fn push(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn front(&self) -> Option<&Job> {
        self.jobs.front()
    }

    /// Remove a queued job by id, keeping the order of the rest.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let index = self.jobs.iter().position(|job| job.id == id)?;
        self.jobs.remove(index)
    }

    /// Take every queued job, oldest first.
    pub fn drain(&mut self) -> Vec<Job> {
        self.jobs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
