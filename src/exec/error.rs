use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::log::LogError;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    pub(crate) fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub(crate) fn from_std(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Errors raised by the execution engine.
///
/// `Clone` so that [`crate::exec::Execution::wait`] can hand the same outcome
/// to every caller.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to allocate pseudo-terminal: {0}")]
    Pty(String),

    #[error("Failed to set up stream '{stream}': {source}")]
    Stream {
        stream: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Process was killed before all commands ran")]
    Aborted,

    #[error("Process exited with {0}")]
    Exit(ExitStatus),

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] Arc<io::Error>),

    #[error("Failed to open log: {0}")]
    LogOpen(#[source] LogError),

    #[error("Failed to close log: {0}")]
    LogClose(#[source] LogError),
}

impl ExecError {
    /// True for errors caused by the child itself rather than by the engine.
    pub fn is_exit(&self) -> bool {
        matches!(self, ExecError::Exit(_))
    }
}
