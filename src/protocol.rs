//! Wire protocol between the coordinator and its execution units.
//!
//! Messages are JSON-serialized and newline-delimited:
//!
//! ```text
//! Request  = { "payload": any }
//! Response = { "ok": true,  "result": any }
//!          | { "ok": false, "error": { "name": string, "message": string, "stack"?: string } }
//! ```
//!
//! A [`Response`] is a closed union. Anything that does not match one of the
//! two shapes is rejected by [`Response::from_line`] rather than trusted.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Request sent from the coordinator to an execution unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Opaque job payload handed to the handler.
    pub payload: Value,
}

impl Request {
    /// Create a request for the given payload.
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Error raised by a handler, in a form that can cross the isolation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{name}: {message}")]
pub struct SerializedError {
    /// Error class, e.g. `"HandlerError"` or `"Panic"`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Optional diagnostic trace (cause chain, panic location).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SerializedError {
    /// Create an error with a name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Attach a diagnostic trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Flatten an error chain into its serializable form.
    ///
    /// A `SerializedError` anywhere at the top of the chain is returned as-is so
    /// handlers can pick their own `name`. Otherwise the top-level message
    /// becomes `message` and each cause is listed in `stack`.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(serialized) = err.downcast_ref::<SerializedError>() {
            return serialized.clone();
        }

        let causes: Vec<String> = err
            .chain()
            .skip(1)
            .map(|cause| format!("caused by: {cause}"))
            .collect();

        let mut serialized = Self::new("Error", err.to_string());
        if !causes.is_empty() {
            serialized.stack = Some(causes.join("\n"));
        }
        serialized
    }
}

/// Response sent from an execution unit back to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub enum Response {
    /// The handler returned a value.
    Ok(Value),
    /// The handler failed.
    Err(SerializedError),
}

/// Why a response line was rejected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Shape(&'static str),
}

/// Flat on-the-wire shape of a [`Response`].
#[derive(Serialize, Deserialize)]
struct WireResponse {
    ok: bool,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<SerializedError>,
}

/// Distinguish an explicit `null` from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<WireResponse> for Response {
    type Error = &'static str;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        match (wire.ok, wire.result, wire.error) {
            (true, _, Some(_)) => Err("ok response must not carry an error"),
            // A handler returning nothing serializes without a result field.
            (true, result, None) => Ok(Self::Ok(result.unwrap_or(Value::Null))),
            (false, None, Some(error)) => Ok(Self::Err(error)),
            (false, Some(_), _) => Err("failed response must not carry a result"),
            (false, None, None) => Err("failed response is missing its error"),
        }
    }
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        match response {
            Response::Ok(result) => Self {
                ok: true,
                result: Some(result),
                error: None,
            },
            Response::Err(error) => Self {
                ok: false,
                result: None,
                error: Some(error),
            },
        }
    }
}

impl Response {
    /// Create a successful response.
    pub fn ok(result: Value) -> Self {
        Self::Ok(result)
    }

    /// Create a failed response.
    pub fn error(error: SerializedError) -> Self {
        Self::Err(error)
    }

    /// Whether this is a success response.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Parse and validate a JSON line.
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line.trim())?;
        if !value.is_object() {
            return Err(ProtocolError::Shape("response is not a JSON object"));
        }
        let wire: WireResponse = serde_json::from_value(value)?;
        Self::try_from(wire).map_err(ProtocolError::Shape)
    }
}
