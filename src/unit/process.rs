//! Process-backed execution units.
//!
//! Each unit is a child process started with piped stdin/stdout. Requests are
//! written as JSON lines to its stdin; its stdout is parsed line by line into
//! responses. Stderr is inherited so worker logs reach the parent's stderr.
//!
//! Per unit two tasks run on the tokio runtime:
//!
//! - a writer task draining queued request lines into stdin (closing stdin
//!   when the unit is stopped, which ends the worker loop);
//! - a reader task forwarding stdout lines as events, then reaping the child
//!   and reporting its [`TerminationReason`].

use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use super::{ExecutionUnit, TerminationReason, UnitEvent, UnitEventSender, UnitId, UnitSignal};
use crate::error::{PoolError, Result};
use crate::protocol::{Request, Response, SerializedError};
use crate::worker::{UNIT_ID_ENV, WORKER_DATA_ENV};

/// How long a stopping worker gets after SIGTERM before SIGKILL.
const SIGTERM_GRACE: Duration = Duration::from_millis(100);

/// How often exit is polled while stopping.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for spawning worker processes.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
}

impl ProcessBackend {
    /// Workers run `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    /// Workers re-execute the current binary (with whatever args select worker mode).
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| PoolError::Spawn(format!("Failed to get current executable: {}", e)))?;
        Ok(Self::new(exe))
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for every worker.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Working directory for every worker.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// The program workers run.
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Spawn one worker process.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        &self,
        id: UnitId,
        worker_data: &Value,
        events: UnitEventSender,
    ) -> Result<ProcessUnit> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        // Startup data travels out of band from the request stream.
        cmd.env(WORKER_DATA_ENV, serde_json::to_string(worker_data)?);
        cmd.env(UNIT_ID_ENV, id.to_string());

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            PoolError::Spawn(format!("{}: {}", self.program.display(), e))
        })?;

        let pid = child
            .id()
            .map(|pid| Pid::from_raw(pid as i32))
            .ok_or_else(|| PoolError::Spawn("Child exited before it could be tracked".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Spawn("Child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Spawn("Child stdout not captured".into()))?;

        let exited = Arc::new(AtomicBool::new(false));
        let killed = Arc::new(AtomicBool::new(false));
        let (requests, queued) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(id, stdin, queued, events.clone()));
        tokio::spawn(read_loop(
            id,
            child,
            stdout,
            events,
            exited.clone(),
            killed.clone(),
        ));

        tracing::debug!(unit_id = id, pid = pid.as_raw(), program = %self.program.display(), "Spawned worker process");

        Ok(ProcessUnit {
            id,
            pid,
            requests: Some(requests),
            exited,
            killed,
            stopping: false,
        })
    }
}

/// Handle to a worker process.
pub struct ProcessUnit {
    id: UnitId,
    pid: Pid,
    /// Request lines for the writer task. Dropping it closes the worker's stdin.
    requests: Option<mpsc::UnboundedSender<String>>,
    /// Set by the reader task once the child is reaped.
    exited: Arc<AtomicBool>,
    /// Set before the pool sends SIGKILL, so the exit is not mistaken for OOM.
    killed: Arc<AtomicBool>,
    stopping: bool,
}

impl ProcessUnit {
    /// Process ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn kill(&self, sig: Signal) {
        if self.exited.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = signal::kill(self.pid, sig) {
            tracing::trace!(unit_id = self.id, pid = self.pid.as_raw(), error = %e, "kill failed");
        }
    }
}

impl ExecutionUnit for ProcessUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "process"
    }

    fn send(&mut self, request: Request) -> Result<()> {
        let line = request.to_line()?;
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| PoolError::Spawn(format!("Worker {} is stopping", self.id)))?;
        requests.send(line).map_err(|_| PoolError::WorkerCrash {
            unit_id: self.id,
            reason: "stdin closed".to_string(),
            error: None,
        })
    }

    fn terminate(&mut self) {
        self.requests = None;
        self.stopping = true;
        self.killed.store(true, Ordering::Release);
        self.kill(Signal::SIGKILL);
    }

    fn stop(&mut self, grace: Duration) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        // Closing stdin lets the worker loop exit on EOF.
        self.requests = None;

        let id = self.id;
        let pid = self.pid;
        let exited = self.exited.clone();
        let killed = self.killed.clone();
        tokio::spawn(async move {
            if wait_for_exit(&exited, grace).await {
                return;
            }

            tracing::debug!(unit_id = id, pid = pid.as_raw(), "Worker ignored EOF, sending SIGTERM");
            let _ = signal::kill(pid, Signal::SIGTERM);
            tokio::time::sleep(SIGTERM_GRACE).await;

            if !exited.load(Ordering::Acquire) {
                tracing::debug!(unit_id = id, pid = pid.as_raw(), "Worker ignored SIGTERM, sending SIGKILL");
                killed.store(true, Ordering::Release);
                let _ = signal::kill(pid, Signal::SIGKILL);
            }
        });
    }
}

impl Drop for ProcessUnit {
    fn drop(&mut self) {
        if !self.stopping {
            self.terminate();
        }
    }
}

/// Poll `exited` for up to `grace`. Returns whether the worker exited.
async fn wait_for_exit(exited: &AtomicBool, grace: Duration) -> bool {
    let started = tokio::time::Instant::now();
    loop {
        if exited.load(Ordering::Acquire) {
            return true;
        }
        if started.elapsed() >= grace {
            return false;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}

/// Forward queued request lines to the worker's stdin.
async fn write_loop(
    id: UnitId,
    mut stdin: ChildStdin,
    mut queued: mpsc::UnboundedReceiver<String>,
    events: UnitEventSender,
) {
    while let Some(line) = queued.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            let error = SerializedError::new("WriteError", format!("Failed to send to worker: {}", e));
            let _ = events.send(UnitEvent {
                unit_id: id,
                signal: UnitSignal::Error(error),
            });
            return;
        }
    }
    // Sender dropped: stdin closes here.
}

/// Forward stdout lines as events, then reap the child.
async fn read_loop(
    id: UnitId,
    mut child: Child,
    stdout: ChildStdout,
    events: UnitEventSender,
    exited: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();

    loop {
        line.clear();
        let signal = match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => match std::str::from_utf8(&line) {
                Ok(text) if text.trim().is_empty() => continue,
                Ok(text) => match Response::from_line(text) {
                    Ok(response) => UnitSignal::Message(response),
                    Err(e) => UnitSignal::Invalid(e.to_string()),
                },
                Err(e) => UnitSignal::Invalid(format!("Worker output is not UTF-8: {}", e)),
            },
            Err(e) => UnitSignal::Error(SerializedError::new(
                "ReadError",
                format!("Failed to receive from worker: {}", e),
            )),
        };

        let fatal = matches!(signal, UnitSignal::Error(_));
        if events.send(UnitEvent { unit_id: id, signal }).is_err() {
            // Coordinator is gone; nobody will ever read this worker again.
            killed.store(true, Ordering::Release);
            let _ = child.start_kill();
            break;
        }
        if fatal {
            break;
        }
    }

    let reason = match child.wait().await {
        Ok(status)
            if killed.load(Ordering::Acquire)
                && status.signal() == Some(Signal::SIGKILL as i32) =>
        {
            TerminationReason::Killed
        }
        Ok(status) => TerminationReason::from_exit_status(status),
        Err(e) => {
            tracing::debug!(unit_id = id, error = %e, "Failed to reap worker");
            TerminationReason::Unknown
        }
    };
    exited.store(true, Ordering::Release);

    tracing::trace!(unit_id = id, reason = %reason, "Worker process exited");
    let _ = events.send(UnitEvent {
        unit_id: id,
        signal: UnitSignal::Exit(reason),
    });
}
