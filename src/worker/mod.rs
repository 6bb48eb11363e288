//! Handler registration inside an isolated execution context.
//!
//! A worker process hands exactly one [`Handler`] to [`run_worker`], which
//! serves requests from stdin until the coordinator closes the pipe. Thread
//! units run the same handler trait in-process (see
//! [`Backend::thread`](crate::unit::Backend::thread)).
//!
//! ```no_run
//! use forkpool::worker::{WorkerContext, run_worker};
//! use serde_json::{Value, json};
//!
//! fn main() {
//!     run_worker(|payload: Value, _ctx: &WorkerContext| {
//!         let x = payload["x"].as_i64().unwrap_or_default();
//!         Ok::<_, anyhow::Error>(json!(x * 2))
//!     });
//! }
//! ```

mod builtin;
pub mod ipc;

use std::io::{self, Read, Write};

use serde_json::Value;

use crate::protocol::{Request, Response, SerializedError};
use ipc::{LineReader, LineWriter, PipeFd};

pub use builtin::BuiltinHandler;

/// Environment variable carrying the JSON-encoded `worker_data`.
pub const WORKER_DATA_ENV: &str = "FORKPOOL_WORKER_DATA";

/// Environment variable carrying the coordinator-assigned unit id.
pub const UNIT_ID_ENV: &str = "FORKPOOL_UNIT_ID";

/// A job handler. Invoked once per request; `Err` becomes an `ok:false` response.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, payload: Value, ctx: &WorkerContext) -> anyhow::Result<Value>;
}

impl<F> Handler for F
where
    F: Fn(Value, &WorkerContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn handle(&self, payload: Value, ctx: &WorkerContext) -> anyhow::Result<Value> {
        self(payload, ctx)
    }
}

/// Startup data handed to an execution context when it is spawned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerContext {
    /// Id the coordinator assigned to this unit.
    pub unit_id: Option<u64>,
    /// Opaque value from [`PoolConfig::worker_data`](crate::PoolConfig::worker_data).
    pub worker_data: Value,
}

impl WorkerContext {
    pub fn new(unit_id: Option<u64>, worker_data: Value) -> Self {
        Self {
            unit_id,
            worker_data,
        }
    }

    /// Read the context a process unit was spawned with.
    pub fn from_env() -> Result<Self, serde_json::Error> {
        let worker_data = match std::env::var(WORKER_DATA_ENV) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => Value::Null,
        };
        let unit_id = std::env::var(UNIT_ID_ENV)
            .ok()
            .and_then(|id| id.parse().ok());
        Ok(Self::new(unit_id, worker_data))
    }
}

/// Run the handler on one payload and wrap the outcome.
pub(crate) fn invoke<H: Handler + ?Sized>(
    handler: &H,
    payload: Value,
    ctx: &WorkerContext,
) -> Response {
    match handler.handle(payload, ctx) {
        Ok(result) => Response::ok(result),
        Err(err) => Response::error(SerializedError::from_error(&err)),
    }
}

/// Serve requests until EOF. Returns the number of requests handled.
///
/// An unparseable request line is answered with an `InvalidRequest` error so
/// the coordinator is never left waiting.
pub fn serve<H, R, W>(
    handler: &H,
    ctx: &WorkerContext,
    reader: &mut LineReader<R>,
    writer: &mut LineWriter<W>,
) -> io::Result<usize>
where
    H: Handler + ?Sized,
    R: Read,
    W: Write,
{
    let mut handled = 0;

    loop {
        let line = match reader.read_line()? {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => line.to_string(),
            None => return Ok(handled),
        };

        let response = match Request::from_line(&line) {
            Ok(request) => {
                handled += 1;
                invoke(handler, request.payload, ctx)
            }
            Err(e) => Response::error(SerializedError::new(
                "InvalidRequest",
                format!("Invalid request: {}", e),
            )),
        };

        writer.write_line(&response.to_line().map_err(io::Error::other)?)?;
    }
}

/// Run the worker process main loop with `handler`.
///
/// Reads requests from stdin and writes responses to stdout, exiting with
/// status 0 when the coordinator closes stdin. A handler panic is not caught:
/// the process dies and the coordinator reports a crash.
pub fn run_worker<H: Handler>(handler: H) -> ! {
    // Pipe errors surface as io::Error instead of killing the process.
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let ctx = match WorkerContext::from_env() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Worker error: invalid {}: {}", WORKER_DATA_ENV, e);
            std::process::exit(2);
        }
    };

    let mut reader = LineReader::new(PipeFd::stdin());
    let mut writer = LineWriter::new(PipeFd::stdout());

    match serve(&handler, &ctx, &mut reader, &mut writer) {
        Ok(handled) => {
            tracing::debug!(unit_id = ?ctx.unit_id, handled, "Worker input closed");
            std::process::exit(0)
        }
        Err(e) => {
            eprintln!("Worker error: {}", e);
            std::process::exit(1);
        }
    }
}
