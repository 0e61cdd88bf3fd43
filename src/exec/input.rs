use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

/// Writes interactive input to a running child.
///
/// Cloneable; all clones share one underlying writer. When a tap is set,
/// every accepted write is also forwarded to it so it can be logged.
#[derive(Clone, Default)]
pub struct InputWriter {
    inner: Arc<Mutex<Option<InputSink>>>,
}

struct InputSink {
    writer: Box<dyn Write + Send>,
    tap: Option<Sender<Vec<u8>>>,
}

impl InputWriter {
    pub(crate) fn attach(&self, writer: Box<dyn Write + Send>, tap: Option<Sender<Vec<u8>>>) {
        *self.inner.lock() = Some(InputSink { writer, tap });
    }

    /// Writes all of `bytes` and flushes.
    pub fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let Some(sink) = guard.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "input is closed"));
        };
        sink.writer.write_all(bytes)?;
        sink.writer.flush()?;
        if let Some(tap) = &sink.tap {
            let _ = tap.send(bytes.to_vec());
        }
        Ok(bytes.len())
    }

    /// Closes the child's input. Further writes fail with `BrokenPipe`.
    pub fn close(&self) {
        self.inner.lock().take();
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl Write for InputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Byte source fed from a channel; end-of-file once every sender is gone.
pub(crate) struct ChannelSource {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl ChannelSource {
    pub(crate) fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
        }
    }
}

impl Read for ChannelSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.rx.recv() {
                Ok(bytes) => self.pending = bytes,
                Err(_) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}
