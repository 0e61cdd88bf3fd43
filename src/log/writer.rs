use std::io::Write;

use parking_lot::Mutex;

use crate::log::error::LogError;
use crate::log::record::{LogRecord, StreamTag};

/// Serializes records from any number of producers onto one sink.
///
/// Every append and the final close happen under one lock owned by this
/// writer, so a record is never interleaved with another and two writers
/// never contend with each other.
pub struct LogWriter<W: Write + Send = Box<dyn Write + Send>> {
    sink: Mutex<Option<W>>,
}

impl<W: Write + Send> LogWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
        }
    }

    /// Appends one data record and flushes it.
    pub fn write(&self, tag: StreamTag, data: &[u8]) -> Result<(), LogError> {
        let line = LogRecord::data(tag, data).to_line()?;
        let mut sink = self.sink.lock();
        let sink = sink.as_mut().ok_or(LogError::WriterClosed)?;
        sink.write_all(&line)?;
        sink.flush()?;
        Ok(())
    }

    /// Writes one terminal record per tag and releases the sink.
    ///
    /// Closing an already closed writer is a no-op.
    pub fn close(&self) -> Result<(), LogError> {
        let mut guard = self.sink.lock();
        let Some(mut sink) = guard.take() else {
            return Ok(());
        };
        for tag in StreamTag::ALL {
            sink.write_all(&LogRecord::terminal(tag).to_line()?)?;
        }
        sink.flush()?;
        tracing::debug!("log writer closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sink.lock().is_none()
    }
}
