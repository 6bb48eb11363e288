//! Worker pool: job submission, dispatch and supervision.
//!
//! [`WorkerPool`] is a cheap, cloneable handle to a coordinator task that
//! owns all pool state. Two strategies are available (see [`PoolMode`]):
//!
//! - **ephemeral**: a fresh unit per job, optionally capped by
//!   `max_concurrency`;
//! - **persistent**: `workers` long-lived units reused across jobs, replaced
//!   on crash within the [`RestartPolicy`](crate::RestartPolicy) budget.
//!
//! ```no_run
//! use forkpool::{Backend, PoolConfig, SubmitOptions, WorkerPool, WorkerContext};
//! use serde_json::{Value, json};
//!
//! # async fn demo() -> forkpool::Result<()> {
//! let backend = Backend::thread(|payload: Value, _ctx: &WorkerContext| {
//!     Ok::<_, anyhow::Error>(json!(payload["x"].as_i64().unwrap_or(0) * 2))
//! });
//! let pool = WorkerPool::new(PoolConfig::persistent(backend, 4))?;
//!
//! let result = pool.submit(json!({"x": 2}), SubmitOptions::default()).await?;
//! assert_eq!(result, json!(4));
//!
//! pool.shutdown("done").await?;
//! # Ok(())
//! # }
//! ```

mod budget;
mod coordinator;
mod job;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::{PoolConfig, PoolMode};
use crate::error::{PoolError, Result};
use coordinator::{Command, Coordinator};
use job::Job;

pub use job::JobId;

/// Per-job options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Overrides the pool's default timeout.
    pub timeout: Option<Duration>,
    /// Aborts the job when cancelled, whether queued or running.
    pub cancellation: Option<CancellationToken>,
}

impl SubmitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub mode: PoolMode,
    /// Jobs currently bound to a unit.
    pub active_jobs: usize,
    /// Jobs waiting for a unit.
    pub queued_jobs: usize,
    /// Maximum simultaneous jobs; `None` when unbounded.
    pub capacity: Option<usize>,
    pub idle_units: usize,
    /// Units that are idle or busy.
    pub live_units: usize,
    /// Units started over the pool's lifetime.
    pub units_spawned: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// Crash-triggered restarts over the pool's lifetime.
    pub total_restarts: u64,
    /// Whether the next failure would shrink the pool.
    pub budget_exhausted: bool,
    pub shutting_down: bool,
}

/// Handle to a pool of execution units.
///
/// Clones share the same coordinator. When every clone is dropped the
/// coordinator finishes the jobs it already accepted and then stops all units.
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
    next_job_id: Arc<AtomicU64>,
    mode: PoolMode,
}

impl WorkerPool {
    /// Validate `config`, start the coordinator and, for persistent pools,
    /// spawn every unit.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PoolError::Config(format!("no tokio runtime: {}", e)))?;

        let mode = config.mode;
        let mut coordinator = Coordinator::new(config);
        coordinator.fill()?;

        let (commands, rx) = mpsc::unbounded_channel();
        runtime.spawn(coordinator.run(rx));

        Ok(Self {
            commands,
            next_job_id: Arc::new(AtomicU64::new(1)),
            mode,
        })
    }

    /// The pool's strategy.
    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    /// Queue a job. The returned handle resolves exactly once.
    pub fn submit(&self, payload: Value, options: SubmitOptions) -> JobHandle {
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        let mut job = Job::new(id, payload, options.timeout, options.cancellation, reply);

        if job.cancellation.as_ref().is_some_and(|token| token.is_cancelled()) {
            job.settle(Err(PoolError::Aborted));
        } else if let Err(mpsc::error::SendError(Command::Submit(mut job))) =
            self.commands.send(Command::Submit(job))
        {
            job.settle(Err(closed()));
        }

        JobHandle { id, rx }
    }

    /// Submit a serializable payload and deserialize the result.
    pub async fn call<P, R>(&self, payload: &P, options: SubmitOptions) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload)?;
        let result = self.submit(payload, options).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Current counters.
    pub async fn stats(&self) -> Result<PoolStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats(reply))?;
        rx.await.map_err(|_| closed())
    }

    /// Reject every queued job with [`PoolError::Drained`]. Running jobs are
    /// unaffected. Returns the number of jobs drained.
    pub async fn drain_queue(&self, reason: impl Into<String>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Drain {
            reason: reason.into(),
            reply,
        })?;
        rx.await.map_err(|_| closed())
    }

    /// Drain the queue, reject running jobs with [`PoolError::ShuttingDown`]
    /// and stop every unit. Later submissions are rejected.
    pub async fn shutdown(&self, reason: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown {
            reason: reason.into(),
            reply,
        })?;
        rx.await.map_err(|_| closed())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| closed())
    }
}

fn closed() -> PoolError {
    PoolError::ShuttingDown("pool closed".to_string())
}

/// Completion handle for a submitted job.
#[must_use = "a job's result is only observed by awaiting its handle"]
pub struct JobHandle {
    id: JobId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }
}

impl Future for JobHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(closed())),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestartPolicy;
    use crate::unit::Backend;
    use crate::worker::WorkerContext;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn handler(payload: Value, _ctx: &WorkerContext) -> anyhow::Result<Value> {
        if let Some(ms) = payload["sleep_ms"].as_u64() {
            std::thread::sleep(Duration::from_millis(ms));
        }
        if payload["panic"].as_bool() == Some(true) {
            panic!("worker blew up");
        }
        if let Some(message) = payload["fail"].as_str() {
            anyhow::bail!("{}", message);
        }
        Ok(json!(payload["x"].as_i64().unwrap_or(0) * 2))
    }

    fn persistent(workers: usize) -> PoolConfig {
        PoolConfig::persistent(Backend::thread(handler), workers)
    }

    fn ephemeral() -> PoolConfig {
        PoolConfig::ephemeral(Backend::thread(handler))
    }

    #[tokio::test]
    async fn test_double_returns_four() {
        let pool = WorkerPool::new(ephemeral()).unwrap();
        let result = pool.submit(json!({"x": 2}), SubmitOptions::default()).await;
        assert_eq!(result.unwrap(), json!(4));
    }

    #[tokio::test]
    async fn test_call_is_typed() {
        let pool = WorkerPool::new(persistent(1)).unwrap();
        let doubled: i64 = pool
            .call(&json!({"x": 21}), SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(doubled, 42);
    }

    #[tokio::test]
    async fn test_short_timeout_rejects() {
        let pool = WorkerPool::new(ephemeral()).unwrap();
        let options = SubmitOptions::default().with_timeout(Duration::from_millis(1));
        let err = pool
            .submit(json!({"x": 2, "sleep_ms": 50}), options)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_timeout_enforced_and_unit_replaced() {
        let pool = WorkerPool::new(persistent(1)).unwrap();
        let start = Instant::now();
        let options = SubmitOptions::default().with_timeout(Duration::from_millis(100));
        let err = pool
            .submit(json!({"x": 1, "sleep_ms": 500}), options)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout(d) if d == Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_millis(400));

        // The replacement serves the next job.
        let result = pool.submit(json!({"x": 3}), SubmitOptions::default()).await;
        assert_eq!(result.unwrap(), json!(6));
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.total_restarts, 1);
        assert_eq!(stats.live_units, 1);
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        let config = persistent(1).with_default_timeout(Duration::from_millis(50));
        let pool = WorkerPool::new(config).unwrap();
        let err = pool
            .submit(json!({"sleep_ms": 300}), SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_ephemeral_concurrency_cap() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let backend = {
            let running = running.clone();
            let peak = peak.clone();
            Backend::thread(move |_payload: Value, _ctx: &WorkerContext| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(Value::Null)
            })
        };
        let pool = WorkerPool::new(PoolConfig::ephemeral(backend).with_max_concurrency(2)).unwrap();

        let handles: Vec<JobHandle> = (0..6)
            .map(|_| pool.submit(Value::Null, SubmitOptions::default()))
            .collect();

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.active_jobs, 2);
        assert_eq!(stats.queued_jobs, 4);
        assert_eq!(stats.capacity, Some(2));

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.units_spawned, 6);
        assert_eq!(stats.jobs_completed, 6);
    }

    #[tokio::test]
    async fn test_crash_is_isolated_and_replaced() {
        let pool = WorkerPool::new(persistent(2)).unwrap();

        let slow = pool.submit(json!({"x": 5, "sleep_ms": 100}), SubmitOptions::default());
        let crash = pool.submit(json!({"panic": true}), SubmitOptions::default());

        match crash.await.unwrap_err() {
            PoolError::WorkerCrash { error, .. } => {
                let error = error.expect("panic details");
                assert_eq!(error.name, "Panic");
                assert_eq!(error.message, "worker blew up");
            }
            other => panic!("Expected WorkerCrash, got {:?}", other),
        }
        assert_eq!(slow.await.unwrap(), json!(10));

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.live_units, 2);
        assert_eq!(stats.total_restarts, 1);
        assert_eq!(stats.units_spawned, 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_shrinks_pool() {
        let config =
            persistent(2).with_restart(RestartPolicy::new(1, Duration::from_secs(60)));
        let pool = WorkerPool::new(config).unwrap();
        let crash = || pool.submit(json!({"panic": true}), SubmitOptions::default());

        assert!(crash().await.is_err());
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.live_units, 2);
        assert!(stats.budget_exhausted);

        assert!(crash().await.is_err());
        assert_eq!(pool.stats().await.unwrap().live_units, 1);

        assert!(crash().await.is_err());
        assert_eq!(pool.stats().await.unwrap().live_units, 0);

        let err = pool.submit(json!({"x": 1}), SubmitOptions::default()).await.unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted));
    }

    #[tokio::test]
    async fn test_unbounded_restart_window() {
        let config = persistent(1).with_restart(RestartPolicy::new(1, Duration::MAX));
        let pool = WorkerPool::new(config).unwrap();

        let crash = pool.submit(json!({"panic": true}), SubmitOptions::default()).await;
        assert!(matches!(crash, Err(PoolError::WorkerCrash { .. })));

        let result = pool.submit(json!({"x": 1}), SubmitOptions::default()).await;
        assert_eq!(result.unwrap(), json!(2));
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.total_restarts, 1);
        assert!(stats.budget_exhausted);
    }

    #[tokio::test]
    async fn test_delayed_respawn_serves_queued_jobs() {
        let restart = RestartPolicy::new(5, Duration::from_secs(60))
            .with_delay(Duration::from_millis(50));
        let pool = WorkerPool::new(persistent(1).with_restart(restart)).unwrap();

        let crashed_at = Instant::now();
        let crash = pool.submit(json!({"panic": true}), SubmitOptions::default()).await;
        assert!(matches!(crash, Err(PoolError::WorkerCrash { .. })));

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.live_units, 0);
        assert_eq!(stats.total_restarts, 1);

        // No unit is alive, but one is on the way.
        let queued = pool.submit(json!({"x": 3}), SubmitOptions::default());
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.queued_jobs, 1);
        assert_eq!(stats.live_units, 0);

        assert_eq!(queued.await.unwrap(), json!(6));
        assert!(crashed_at.elapsed() >= Duration::from_millis(50));

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.live_units, 1);
        assert_eq!(stats.units_spawned, 2);
    }

    #[tokio::test]
    async fn test_response_racing_deadline_settles_once() {
        let config = persistent(1).with_restart(RestartPolicy::new(100, Duration::from_secs(60)));
        let pool = WorkerPool::new(config).unwrap();

        let rounds = 8;
        for _ in 0..rounds {
            let options = SubmitOptions::default().with_timeout(Duration::from_millis(20));
            match pool.submit(json!({"x": 1, "sleep_ms": 20}), options).await {
                Ok(result) => assert_eq!(result, json!(2)),
                Err(PoolError::Timeout(_)) => {}
                Err(other) => panic!("Expected result or Timeout, got {:?}", other),
            }
        }

        // Let any losing signal arrive before counting.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.jobs_completed + stats.jobs_failed, rounds);
        assert_eq!(stats.active_jobs, 0);
    }

    #[tokio::test]
    async fn test_cancel_after_settle_is_ignored() {
        let pool = WorkerPool::new(persistent(1)).unwrap();
        let token = CancellationToken::new();
        let handle = pool.submit(
            json!({"x": 2}),
            SubmitOptions::default().with_cancellation(token.clone()),
        );
        assert_eq!(handle.await.unwrap(), json!(4));

        token.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.jobs_failed, 0);
        assert_eq!(stats.total_restarts, 0);
    }

    #[tokio::test]
    async fn test_handler_error_keeps_unit() {
        let pool = WorkerPool::new(persistent(1)).unwrap();

        let err = pool
            .submit(json!({"fail": "bad input"}), SubmitOptions::default())
            .await
            .unwrap_err();
        match &err {
            PoolError::Handler(error) => assert_eq!(error.message, "bad input"),
            other => panic!("Expected Handler, got {:?}", other),
        }

        assert_eq!(
            pool.submit(json!({"x": 4}), SubmitOptions::default()).await.unwrap(),
            json!(8)
        );
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.units_spawned, 1);
        assert_eq!(stats.total_restarts, 0);
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.jobs_completed, 1);
    }

    #[tokio::test]
    async fn test_queued_cancellation_never_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = {
            let calls = calls.clone();
            Backend::thread(move |_payload: Value, _ctx: &WorkerContext| {
                calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                Ok::<_, anyhow::Error>(Value::Null)
            })
        };
        let pool = WorkerPool::new(PoolConfig::persistent(backend, 1)).unwrap();

        let first = pool.submit(Value::Null, SubmitOptions::default());
        let token = CancellationToken::new();
        let second = pool.submit(
            Value::Null,
            SubmitOptions::default().with_cancellation(token.clone()),
        );
        token.cancel();

        assert!(matches!(second.await, Err(PoolError::Aborted)));
        first.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_skips_queue() {
        let pool = WorkerPool::new(ephemeral()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let handle = pool.submit(json!({"x": 1}), SubmitOptions::default().with_cancellation(token));
        assert!(matches!(handle.await, Err(PoolError::Aborted)));
        assert_eq!(pool.stats().await.unwrap().units_spawned, 0);
    }

    #[tokio::test]
    async fn test_cancel_before_coordinator_sees_job_ephemeral() {
        let pool = WorkerPool::new(ephemeral()).unwrap();
        let token = CancellationToken::new();
        let handle = pool.submit(
            json!({"x": 1}),
            SubmitOptions::default().with_cancellation(token.clone()),
        );
        token.cancel();

        assert!(matches!(handle.await, Err(PoolError::Aborted)));
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.units_spawned, 0);
        assert_eq!(stats.jobs_failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_coordinator_sees_job_persistent() {
        let pool = WorkerPool::new(persistent(1)).unwrap();
        let token = CancellationToken::new();
        let handle = pool.submit(
            json!({"x": 1}),
            SubmitOptions::default().with_cancellation(token.clone()),
        );
        token.cancel();

        assert!(matches!(handle.await, Err(PoolError::Aborted)));
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.total_restarts, 0);
        assert_eq!(stats.units_spawned, 1);
        assert_eq!(stats.idle_units, 1);
    }

    #[tokio::test]
    async fn test_cancelled_while_queued_behind_busy_unit() {
        let pool = WorkerPool::new(persistent(1)).unwrap();
        let running = pool.submit(json!({"x": 1, "sleep_ms": 50}), SubmitOptions::default());
        let token = CancellationToken::new();
        let queued = pool.submit(
            json!({"x": 2}),
            SubmitOptions::default().with_cancellation(token.clone()),
        );
        // Make sure both jobs reached the coordinator.
        assert_eq!(pool.stats().await.unwrap().queued_jobs, 1);

        token.cancel();
        assert_eq!(running.await.unwrap(), json!(2));
        assert!(matches!(queued.await, Err(PoolError::Aborted)));

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.total_restarts, 0);
        assert_eq!(stats.units_spawned, 1);
        assert_eq!(stats.jobs_completed, 1);
    }

    #[tokio::test]
    async fn test_running_cancellation_aborts() {
        let pool = WorkerPool::new(persistent(1)).unwrap();
        let token = CancellationToken::new();
        let handle = pool.submit(
            json!({"sleep_ms": 500}),
            SubmitOptions::default().with_cancellation(token.clone()),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        assert!(matches!(handle.await, Err(PoolError::Aborted)));

        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.total_restarts, 1);
        assert_eq!(stats.live_units, 1);
    }

    #[tokio::test]
    async fn test_drain_queue_leaves_running_jobs() {
        let pool = WorkerPool::new(persistent(1)).unwrap();
        let running = pool.submit(json!({"x": 1, "sleep_ms": 100}), SubmitOptions::default());
        let queued: Vec<JobHandle> = (0..3)
            .map(|x| pool.submit(json!({"x": x}), SubmitOptions::default()))
            .collect();

        assert_eq!(pool.drain_queue("maintenance").await.unwrap(), 3);
        for handle in queued {
            match handle.await {
                Err(PoolError::Drained(reason)) => assert_eq!(reason, "maintenance"),
                other => panic!("Expected Drained, got {:?}", other),
            }
        }
        assert_eq!(running.await.unwrap(), json!(2));
        assert_eq!(pool.drain_queue("again").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_everything() {
        let pool = WorkerPool::new(persistent(1)).unwrap();
        let running = pool.submit(json!({"sleep_ms": 300}), SubmitOptions::default());
        let queued = pool.submit(json!({"x": 1}), SubmitOptions::default());

        pool.shutdown("deploy").await.unwrap();

        assert!(matches!(running.await, Err(PoolError::ShuttingDown(r)) if r == "deploy"));
        assert!(matches!(queued.await, Err(PoolError::Drained(r)) if r == "deploy"));

        let late = pool.submit(json!({"x": 1}), SubmitOptions::default()).await;
        assert!(matches!(late, Err(PoolError::ShuttingDown(r)) if r == "deploy"));

        let stats = pool.stats().await.unwrap();
        assert!(stats.shutting_down);
        assert_eq!(stats.live_units, 0);
    }

    #[tokio::test]
    async fn test_worker_data_reaches_units() {
        let backend = Backend::thread(|_payload: Value, ctx: &WorkerContext| {
            Ok::<_, anyhow::Error>(ctx.worker_data.clone())
        });
        let config = PoolConfig::persistent(backend, 1).with_worker_data(json!({"region": "eu"}));
        let pool = WorkerPool::new(config).unwrap();
        let result = pool.submit(Value::Null, SubmitOptions::default()).await;
        assert_eq!(result.unwrap(), json!({"region": "eu"}));
    }

    #[tokio::test]
    async fn test_dropped_pool_finishes_accepted_jobs() {
        let pool = WorkerPool::new(persistent(1)).unwrap();
        let handle = pool.submit(json!({"x": 7, "sleep_ms": 50}), SubmitOptions::default());
        drop(pool);
        assert_eq!(handle.await.unwrap(), json!(14));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let err = WorkerPool::new(persistent(0)).err().expect("config error");
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(matches!(WorkerPool::new(persistent(1)), Err(PoolError::Config(_))));
    }

    #[test]
    fn test_stats_serialize() {
        let stats = PoolStats {
            mode: PoolMode::Ephemeral,
            active_jobs: 1,
            queued_jobs: 0,
            capacity: None,
            idle_units: 0,
            live_units: 1,
            units_spawned: 1,
            jobs_completed: 0,
            jobs_failed: 0,
            total_restarts: 0,
            budget_exhausted: false,
            shutting_down: false,
        };
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["mode"], json!("ephemeral"));
        assert_eq!(value["capacity"], Value::Null);
    }
}
