use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::log::record::StreamTag;

/// Errors raised while writing or replaying a process log.
#[derive(Debug, Clone, Error)]
pub enum LogError {
    #[error("Failed to encode log record: {0}")]
    Encode(#[source] Arc<serde_json::Error>),

    #[error("Failed to decode log record '{line}': {source}")]
    Decode {
        line: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("Unknown stream tag '{0}'")]
    UnknownTag(String),

    #[error("Log writer is closed")]
    WriterClosed,

    #[error("Log I/O failed: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("Log ended before the terminal record of {0}")]
    Truncated(StreamTag),

    #[error("Log reader was closed before replay finished")]
    Cancelled,
}

impl From<io::Error> for LogError {
    fn from(err: io::Error) -> Self {
        LogError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for LogError {
    fn from(err: serde_json::Error) -> Self {
        LogError::Encode(Arc::new(err))
    }
}
