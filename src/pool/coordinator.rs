//! The coordinator task.
//!
//! A single task owns the queue, the units and the restart budget. Callers,
//! units and timers only talk to it over channels, and every outcome for a
//! job goes through [`Coordinator::settle`], so a job resolves at most once no
//! matter which signals race.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::PoolStats;
use super::budget::RestartBudget;
use super::job::{Job, JobId, JobQueue};
use crate::config::{PoolConfig, PoolMode};
use crate::error::{PoolError, Result};
use crate::protocol::{Request, Response};
use crate::unit::{ExecutionUnit, UnitEvent, UnitEventSender, UnitId, UnitSignal, UnitState};

/// Requests from pool handles.
pub(crate) enum Command {
    Submit(Job),
    Stats(oneshot::Sender<PoolStats>),
    Drain {
        reason: String,
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reason: String,
        reply: oneshot::Sender<()>,
    },
}

/// Signals raised by the coordinator's own timers and watchers.
enum Internal {
    Deadline { job_id: JobId },
    Cancelled { job_id: JobId },
    Respawn,
}

/// A unit and the job bound to it.
struct Slot {
    unit: Box<dyn ExecutionUnit>,
    state: UnitState,
    job: Option<Job>,
}

pub(crate) struct Coordinator {
    config: PoolConfig,
    queue: JobQueue,
    /// Ordered by id so dispatch picks the oldest idle unit.
    slots: BTreeMap<UnitId, Slot>,
    next_unit_id: UnitId,
    budget: RestartBudget,
    pending_respawns: usize,
    units_spawned: u64,
    jobs_completed: u64,
    jobs_failed: u64,
    /// Set once shutdown starts; the reason is given to later submitters.
    shutdown_reason: Option<String>,
    unit_tx: UnitEventSender,
    unit_rx: mpsc::UnboundedReceiver<UnitEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl Coordinator {
    pub fn new(config: PoolConfig) -> Self {
        let (unit_tx, unit_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            budget: RestartBudget::new(config.restart),
            config,
            queue: JobQueue::default(),
            slots: BTreeMap::new(),
            next_unit_id: 1,
            pending_respawns: 0,
            units_spawned: 0,
            jobs_completed: 0,
            jobs_failed: 0,
            shutdown_reason: None,
            unit_tx,
            unit_rx,
            internal_tx,
            internal_rx,
        }
    }

    /// Start the configured number of idle units (persistent pools).
    pub fn fill(&mut self) -> Result<()> {
        if self.config.mode != PoolMode::Persistent {
            return Ok(());
        }
        let workers = self.config.workers.unwrap_or(1);
        for _ in 0..workers {
            if let Err(e) = self.spawn_unit(UnitState::Idle) {
                // Kill whatever already started before reporting.
                for slot in self.slots.values_mut() {
                    slot.unit.terminate();
                }
                return Err(e);
            }
        }
        tracing::debug!(workers, kind = self.config.backend.kind(), "Worker pool filled");
        Ok(())
    }

    /// Run until every pool handle is dropped and no work is left.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut handles_dropped = false;

        loop {
            if handles_dropped && self.queue.is_empty() && self.busy_units() == 0 {
                if self.shutdown_reason.is_none() {
                    self.shutdown("pool dropped".to_string());
                }
                break;
            }

            tokio::select! {
                command = commands.recv(), if !handles_dropped => match command {
                    Some(command) => self.handle_command(command),
                    None => handles_dropped = true,
                },
                Some(event) = self.unit_rx.recv() => self.handle_unit_event(event),
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
            }
        }

        tracing::debug!(
            jobs_completed = self.jobs_completed,
            jobs_failed = self.jobs_failed,
            "Coordinator stopped"
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(job) => self.submit(job),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Drain { reason, reply } => {
                let drained = self.drain(&reason);
                let _ = reply.send(drained);
            }
            Command::Shutdown { reason, reply } => {
                self.shutdown(reason);
                let _ = reply.send(());
            }
        }
    }

    fn submit(&mut self, mut job: Job) {
        if let Some(reason) = &self.shutdown_reason {
            let reason = reason.clone();
            self.settle(job, Err(PoolError::ShuttingDown(reason)));
            return;
        }
        if self.is_exhausted() {
            self.settle(job, Err(PoolError::PoolExhausted));
            return;
        }
        if job.is_cancelled() {
            tracing::debug!(job_id = job.id, "Job cancelled before it was queued");
            self.settle(job, Err(PoolError::Aborted));
            return;
        }

        if job.timeout.is_none() {
            job.timeout = self.config.default_timeout;
        }

        if let Some(token) = job.cancellation.clone() {
            let job_id = job.id;
            let internal = self.internal_tx.clone();
            let watcher = tokio::spawn(async move {
                token.cancelled().await;
                let _ = internal.send(Internal::Cancelled { job_id });
            });
            job.watch(watcher.abort_handle());
        }

        tracing::trace!(job_id = job.id, queued = self.queue.len(), "Job submitted");
        self.queue.push(job);
        self.dispatch();
    }

    /// Bind queued jobs to units while capacity allows.
    fn dispatch(&mut self) {
        if self.shutdown_reason.is_some() {
            return;
        }

        while let Some(next) = self.queue.front() {
            // The cancellation event may still be in flight.
            if next.is_cancelled() {
                if let Some(job) = self.queue.pop() {
                    tracing::debug!(job_id = job.id, "Queued job cancelled");
                    self.settle(job, Err(PoolError::Aborted));
                }
                continue;
            }

            let unit_id = match self.config.mode {
                PoolMode::Persistent => match self.first_idle() {
                    Some(unit_id) => unit_id,
                    None => break,
                },
                PoolMode::Ephemeral => {
                    if let Some(max) = self.config.max_concurrency
                        && self.busy_units() >= max
                    {
                        break;
                    }
                    match self.spawn_unit(UnitState::Busy) {
                        Ok(unit_id) => unit_id,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to spawn worker");
                            if let Some(job) = self.queue.pop() {
                                self.settle(job, Err(e));
                            }
                            continue;
                        }
                    }
                }
            };

            let Some(job) = self.queue.pop() else {
                break;
            };
            self.bind(unit_id, job);
        }
    }

    fn bind(&mut self, unit_id: UnitId, mut job: Job) {
        let Some(slot) = self.slots.get_mut(&unit_id) else {
            let error = PoolError::Spawn(format!("Worker {} vanished before dispatch", unit_id));
            self.settle(job, Err(error));
            return;
        };

        let payload = job.payload.take().unwrap_or(Value::Null);
        if let Some(timeout) = job.timeout {
            let job_id = job.id;
            let internal = self.internal_tx.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = internal.send(Internal::Deadline { job_id });
            });
            job.watch(timer.abort_handle());
        }

        tracing::trace!(job_id = job.id, unit_id, "Job dispatched");
        let job_id = job.id;
        slot.state = UnitState::Busy;
        slot.job = Some(job);

        if let Err(e) = slot.unit.send(Request::new(payload)) {
            tracing::debug!(job_id, unit_id, error = %e, "Failed to send job");
            self.fail_unit(
                unit_id,
                PoolError::WorkerCrash {
                    unit_id,
                    reason: e.to_string(),
                    error: None,
                },
            );
        }
    }

    fn handle_unit_event(&mut self, event: UnitEvent) {
        let UnitEvent { unit_id, signal } = event;
        let Some(slot) = self.slots.get_mut(&unit_id) else {
            tracing::trace!(unit_id, "Ignoring event from retired worker");
            return;
        };

        match signal {
            UnitSignal::Message(response) => {
                let state = slot.state;
                match state {
                    UnitState::Busy => {}
                    UnitState::Idle => {
                        self.fail_unit(
                            unit_id,
                            PoolError::InvalidMessage {
                                unit_id,
                                message: "response without a request".to_string(),
                            },
                        );
                        self.dispatch();
                        return;
                    }
                    // Late result of a job that already settled.
                    UnitState::Terminating | UnitState::Dead => return,
                }

                let job = slot.job.take();
                match self.config.mode {
                    PoolMode::Persistent => slot.state = UnitState::Idle,
                    PoolMode::Ephemeral => {
                        slot.state = UnitState::Terminating;
                        slot.unit.stop(self.config.shutdown_grace);
                    }
                }

                if let Some(job) = job {
                    let outcome = match response {
                        Response::Ok(result) => Ok(result),
                        Response::Err(error) => Err(PoolError::Handler(error)),
                    };
                    self.settle(job, outcome);
                }
            }
            UnitSignal::Invalid(message) => {
                self.fail_unit(unit_id, PoolError::InvalidMessage { unit_id, message });
            }
            UnitSignal::Error(error) => {
                self.fail_unit(
                    unit_id,
                    PoolError::WorkerCrash {
                        unit_id,
                        reason: error.to_string(),
                        error: Some(error),
                    },
                );
            }
            UnitSignal::Exit(reason) => {
                if matches!(slot.state, UnitState::Idle | UnitState::Busy) {
                    self.fail_unit(
                        unit_id,
                        PoolError::WorkerCrash {
                            unit_id,
                            reason: reason.description(),
                            error: None,
                        },
                    );
                }
                if let Some(mut slot) = self.slots.remove(&unit_id) {
                    slot.state = UnitState::Dead;
                    tracing::trace!(
                        unit_id = slot.unit.id(),
                        kind = slot.unit.kind(),
                        state = ?slot.state,
                        reason = %reason,
                        "Worker exited"
                    );
                }
            }
        }

        self.dispatch();
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Deadline { job_id } => {
                if let Some((unit_id, timeout)) = self.running(job_id) {
                    let timeout = timeout.unwrap_or_default();
                    self.fail_unit(unit_id, PoolError::Timeout(timeout));
                }
            }
            Internal::Cancelled { job_id } => {
                if let Some(job) = self.queue.remove(job_id) {
                    tracing::debug!(job_id, "Queued job cancelled");
                    self.settle(job, Err(PoolError::Aborted));
                } else if let Some((unit_id, _)) = self.running(job_id) {
                    self.fail_unit(unit_id, PoolError::Aborted);
                }
            }
            Internal::Respawn => {
                self.pending_respawns = self.pending_respawns.saturating_sub(1);
                if self.shutdown_reason.is_none() {
                    self.spawn_replacement();
                }
            }
        }

        self.dispatch();
    }

    /// Settle the unit's job with `error`, tear the unit down and, in
    /// persistent pools, replace it if the budget allows.
    fn fail_unit(&mut self, unit_id: UnitId, error: PoolError) {
        let Some(slot) = self.slots.get_mut(&unit_id) else {
            return;
        };
        if matches!(slot.state, UnitState::Terminating | UnitState::Dead) {
            return;
        }

        let job = slot.job.take();
        slot.state = UnitState::Terminating;
        slot.unit.terminate();

        tracing::warn!(
            unit_id,
            kind = slot.unit.kind(),
            job_id = ?job.as_ref().map(|job| job.id),
            reason = %error,
            "Worker failed"
        );

        if let Some(job) = job {
            self.settle(job, Err(error));
        }

        if self.config.mode == PoolMode::Persistent && self.shutdown_reason.is_none() {
            self.replace_unit();
        }
    }

    fn replace_unit(&mut self) {
        if !self.budget.try_consume(Instant::now()) {
            tracing::warn!(
                restarts = self.budget.total(),
                live_units = self.live_units(),
                "Restart budget exhausted, pool shrinking"
            );
            self.reject_if_exhausted();
            return;
        }

        tracing::info!(
            restarts = self.budget.total(),
            window_restarts = self.budget.count(),
            "Respawning worker"
        );

        let delay = self.config.restart.delay;
        if delay.is_zero() {
            self.spawn_replacement();
        } else {
            self.pending_respawns += 1;
            let internal = self.internal_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = internal.send(Internal::Respawn);
            });
        }
    }

    fn spawn_replacement(&mut self) {
        if let Err(e) = self.spawn_unit(UnitState::Idle) {
            tracing::error!(error = %e, "Failed to respawn worker");
            self.reject_if_exhausted();
        }
    }

    fn spawn_unit(&mut self, state: UnitState) -> Result<UnitId> {
        let unit_id = self.next_unit_id;
        self.next_unit_id += 1;

        let unit = self
            .config
            .backend
            .spawn(unit_id, &self.config.worker_data, self.unit_tx.clone())?;
        self.units_spawned += 1;
        self.slots.insert(
            unit_id,
            Slot {
                unit,
                state,
                job: None,
            },
        );
        Ok(unit_id)
    }

    /// A persistent pool with no units and nothing on the way cannot run jobs.
    fn is_exhausted(&self) -> bool {
        self.config.mode == PoolMode::Persistent
            && self.live_units() == 0
            && self.pending_respawns == 0
    }

    fn reject_if_exhausted(&mut self) {
        if !self.is_exhausted() {
            return;
        }
        let jobs = self.queue.drain();
        if !jobs.is_empty() {
            tracing::error!(rejected = jobs.len(), "No workers left, rejecting queued jobs");
        }
        for job in jobs {
            self.settle(job, Err(PoolError::PoolExhausted));
        }
    }

    fn drain(&mut self, reason: &str) -> usize {
        let jobs = self.queue.drain();
        let drained = jobs.len();
        for job in jobs {
            self.settle(job, Err(PoolError::Drained(reason.to_string())));
        }
        if drained > 0 {
            tracing::info!(drained, reason, "Drained job queue");
        }
        drained
    }

    fn shutdown(&mut self, reason: String) {
        if self.shutdown_reason.is_some() {
            return;
        }
        tracing::info!(reason = %reason, live_units = self.live_units(), "Shutting down worker pool");

        self.drain(&reason);

        let grace = self.config.shutdown_grace;
        let mut interrupted = Vec::new();
        for slot in self.slots.values_mut() {
            match slot.state {
                UnitState::Busy => {
                    interrupted.extend(slot.job.take());
                    slot.unit.terminate();
                }
                UnitState::Idle => slot.unit.stop(grace),
                UnitState::Terminating | UnitState::Dead => continue,
            }
            slot.state = UnitState::Terminating;
        }
        for job in interrupted {
            self.settle(job, Err(PoolError::ShuttingDown(reason.clone())));
        }

        self.shutdown_reason = Some(reason);
    }

    fn settle(&mut self, mut job: Job, outcome: Result<Value>) {
        let succeeded = outcome.is_ok();
        if !job.settle(outcome) {
            return;
        }
        if succeeded {
            self.jobs_completed += 1;
        } else {
            self.jobs_failed += 1;
        }
        tracing::trace!(
            job_id = job.id,
            ok = succeeded,
            elapsed_ms = job.created_at.elapsed().as_millis() as u64,
            "Job settled"
        );
    }

    fn running(&self, job_id: JobId) -> Option<(UnitId, Option<Duration>)> {
        self.slots.iter().find_map(|(unit_id, slot)| match &slot.job {
            Some(job) if job.id == job_id => Some((*unit_id, job.timeout)),
            _ => None,
        })
    }

    fn first_idle(&self) -> Option<UnitId> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.state == UnitState::Idle)
            .map(|(unit_id, _)| *unit_id)
    }

    fn count_units(&self, state: UnitState) -> usize {
        self.slots.values().filter(|slot| slot.state == state).count()
    }

    fn busy_units(&self) -> usize {
        self.count_units(UnitState::Busy)
    }

    fn live_units(&self) -> usize {
        self.count_units(UnitState::Idle) + self.busy_units()
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            mode: self.config.mode,
            active_jobs: self.busy_units(),
            queued_jobs: self.queue.len(),
            capacity: self.config.capacity(),
            idle_units: self.count_units(UnitState::Idle),
            live_units: self.live_units(),
            units_spawned: self.units_spawned,
            jobs_completed: self.jobs_completed,
            jobs_failed: self.jobs_failed,
            total_restarts: self.budget.total(),
            budget_exhausted: self.config.mode == PoolMode::Persistent
                && self.budget.is_exhausted(Instant::now()),
            shutting_down: self.shutdown_reason.is_some(),
        }
    }
}
