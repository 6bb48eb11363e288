//! Built-in handlers served by `forkpool worker`.

use std::time::Duration;

use clap::ValueEnum;
use serde_json::{Value, json};

use super::{Handler, WorkerContext};
use crate::protocol::SerializedError;

/// Handlers the bundled binary can run in worker mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuiltinHandler {
    /// Return the payload unchanged.
    Echo,
    /// Return `payload.x * 2`.
    Double,
    /// Sleep `payload.ms` milliseconds, then return `payload.value`.
    Sleep,
    /// Fail with `payload.name` / `payload.message`.
    Fail,
    /// Exit the process with `payload.code` (default 70) without responding.
    Crash,
    /// Return the unit id and worker data this context was spawned with.
    Context,
}

impl Handler for BuiltinHandler {
    fn handle(&self, payload: Value, ctx: &WorkerContext) -> anyhow::Result<Value> {
        match self {
            Self::Echo => Ok(payload),
            Self::Double => double(&payload),
            Self::Sleep => {
                let ms = payload["ms"].as_u64().unwrap_or(0);
                std::thread::sleep(Duration::from_millis(ms));
                Ok(payload.get("value").cloned().unwrap_or(Value::Null))
            }
            Self::Fail => {
                let name = payload["name"].as_str().unwrap_or("HandlerError");
                let message = payload["message"].as_str().unwrap_or("handler failed");
                Err(SerializedError::new(name, message).into())
            }
            Self::Crash => {
                let code = payload["code"].as_i64().unwrap_or(70) as i32;
                std::process::exit(code)
            }
            Self::Context => Ok(json!({
                "unit_id": ctx.unit_id,
                "worker_data": ctx.worker_data,
            })),
        }
    }
}

fn double(payload: &Value) -> anyhow::Result<Value> {
    let x = &payload["x"];
    if let Some(int) = x.as_i64() {
        return Ok(json!(int * 2));
    }
    match x.as_f64() {
        Some(float) => Ok(json!(float * 2.0)),
        None => Err(SerializedError::new("TypeError", format!("x must be a number, got {}", x)).into()),
    }
}
