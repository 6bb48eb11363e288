//! Crash analysis for execution units.
//!
//! Classifies why a unit's backing process or thread went away so crash
//! errors carry a useful reason.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;

/// Reason why an execution unit terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Killed by the pool after a timeout or cancellation.
    Killed,
    /// Likely out of memory (SIGKILL not sent by the pool).
    OutOfMemory,
    /// Stack overflow (SIGSEGV on Linux, SIGBUS on macOS).
    StackOverflow(Signal),
    /// The handler panicked (thread units).
    Panicked,
    /// Unknown termination reason.
    Unknown,
}

impl TerminationReason {
    /// Classify a reaped child's exit status.
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        match status.signal().map(Signal::try_from) {
            // SIGKILL we did not send ourselves is most often the OOM killer.
            Some(Ok(Signal::SIGKILL)) => Self::OutOfMemory,
            Some(Ok(sig @ (Signal::SIGSEGV | Signal::SIGBUS))) => Self::StackOverflow(sig),
            Some(Ok(sig)) => Self::Signaled(sig),
            _ => Self::Unknown,
        }
    }

    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Killed => "killed by the pool".to_string(),
            Self::OutOfMemory => "killed by SIGKILL (possibly out of memory)".to_string(),
            Self::StackOverflow(sig) => format!("stack overflow ({:?})", sig),
            Self::Panicked => "handler panicked".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
