//! Framed, replayable process logs.

mod buffer;
mod error;
mod reader;
mod record;
mod writer;

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

pub use buffer::StreamBuffer;
pub use error::LogError;
pub use reader::{LogReader, ReplayMode, ReplayOptions, Transcript};
pub use record::{LogRecord, StreamTag};
pub use writer::LogWriter;

/// In-memory log sink that stays readable after the writer releases it.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
