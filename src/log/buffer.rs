use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Reader-side reconstruction of one tagged stream.
///
/// A bounded queue of chunks plus a closed flag. Producers block while the
/// queue is full; readers block until a chunk arrives or the buffer closes.
/// Reads are not chunk-atomic: a read with a small buffer takes a prefix of
/// the head chunk and leaves the rest queued for the next read.
#[derive(Clone)]
pub struct StreamBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

struct State {
    chunks: VecDeque<Vec<u8>>,
    closed: bool,
}

impl StreamBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    chunks: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                readable: Condvar::new(),
                writable: Condvar::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Queues a chunk, blocking while the buffer is full.
    ///
    /// Returns `false` when the buffer is closed and the chunk was dropped.
    /// Empty chunks are accepted and discarded.
    pub fn push(&self, chunk: Vec<u8>) -> bool {
        let mut state = self.inner.state.lock();
        while !state.closed && state.chunks.len() >= self.inner.capacity {
            self.inner.writable.wait(&mut state);
        }
        if state.closed {
            return false;
        }
        if !chunk.is_empty() {
            state.chunks.push_back(chunk);
            self.inner.readable.notify_one();
        }
        true
    }

    /// Marks the end of the stream. Queued chunks stay readable.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        self.inner.readable.notify_all();
        self.inner.writable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of chunks waiting to be read.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().chunks.len()
    }

    /// Reads into `buf`, returning 0 only once the buffer is closed and drained.
    pub fn read_into(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut state = self.inner.state.lock();
        loop {
            if let Some(mut chunk) = state.chunks.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.chunks.push_front(chunk.split_off(n));
                } else {
                    self.inner.writable.notify_one();
                }
                return n;
            }
            if state.closed {
                return 0;
            }
            self.inner.readable.wait(&mut state);
        }
    }

    /// Drains the stream to its end.
    pub fn read_all(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut state = self.inner.state.lock();
        loop {
            while let Some(chunk) = state.chunks.pop_front() {
                out.extend_from_slice(&chunk);
            }
            self.inner.writable.notify_all();
            if state.closed {
                return out;
            }
            self.inner.readable.wait(&mut state);
        }
    }
}

impl Read for StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}
