//! Turns a blocking byte source into a cancellable channel of chunks.
//!
//! Each adapter owns two threads: a reader that performs the blocking reads
//! and a pump that forwards chunks while polling for a stop request. Stop and
//! its acknowledgment travel on separate channels. The pump sends the
//! acknowledgment exactly once on every exit path, so [`ChunkChannel::stop`]
//! never waits on an adapter that has already finished.

use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Polls worth of waiting on the source allowed after a stop request before
/// the pump gives up on a source that keeps producing. Time spent blocked on
/// a slow consumer does not count.
const DRAIN_POLLS: u32 = 20;

/// Raw results handed from the reader thread to the pump.
const RAW_CAPACITY: usize = 4;

#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Largest chunk a single read produces.
    pub chunk_size: usize,
    /// How long the pump waits for data before re-checking for a stop request.
    pub poll_interval: Duration,
    /// Chunks buffered between the pump and the consumer.
    pub capacity: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            poll_interval: Duration::from_millis(50),
            capacity: 64,
        }
    }
}

/// Outcome reported by an adapter when it stops.
pub type ChunkResult = Result<(), Arc<io::Error>>;

/// Control side of a running adapter.
pub struct ChunkChannel {
    name: String,
    stop: Sender<()>,
    ack: Receiver<ChunkResult>,
    outcome: Option<ChunkResult>,
}

impl ChunkChannel {
    /// Starts reading `source`. Chunks arrive on the returned receiver, which
    /// disconnects once the adapter has stopped.
    pub fn spawn<R>(
        name: &str,
        source: R,
        options: &ChunkOptions,
    ) -> io::Result<(Self, Receiver<Vec<u8>>)>
    where
        R: Read + Send + 'static,
    {
        let (raw_tx, raw_rx) = mpsc::sync_channel(RAW_CAPACITY);
        let (out_tx, out_rx) = mpsc::sync_channel(options.capacity.max(1));
        let (stop_tx, stop_rx) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);

        let chunk_size = options.chunk_size.max(1);
        thread::Builder::new()
            .name(format!("{name}-read"))
            .spawn(move || read_loop(source, chunk_size, raw_tx))?;

        let poll_interval = options.poll_interval;
        let pump_name = name.to_string();
        thread::Builder::new()
            .name(format!("{name}-pump"))
            .spawn(move || {
                let mut ack = scopeguard::guard(
                    (ack_tx, Err(Arc::new(io::Error::other("chunk pump terminated abnormally")))),
                    |(ack_tx, outcome)| {
                        let _ = ack_tx.send(outcome);
                    },
                );
                ack.1 = pump(&pump_name, raw_rx, out_tx, stop_rx, poll_interval);
            })?;

        tracing::debug!(stream = name, "chunk adapter started");
        Ok((
            Self {
                name: name.to_string(),
                stop: stop_tx,
                ack: ack_rx,
                outcome: None,
            },
            out_rx,
        ))
    }

    /// Requests termination and blocks until the adapter acknowledges it.
    ///
    /// Chunks already read are still delivered before the acknowledgment.
    /// Calling this again returns the first outcome.
    pub fn stop(&mut self) -> ChunkResult {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        // The pump may have exited already; its acknowledgment is queued.
        let _ = self.stop.send(());
        let outcome = self.ack.recv().unwrap_or_else(|_| {
            Err(Arc::new(io::Error::other("chunk adapter vanished without acknowledging")))
        });
        tracing::debug!(stream = %self.name, ok = outcome.is_ok(), "chunk adapter stopped");
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// True once the adapter has stopped on its own or after [`Self::stop`].
    pub fn is_finished(&mut self) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        match self.ack.try_recv() {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        }
    }
}

fn read_loop<R: Read>(mut source: R, chunk_size: usize, raw: SyncSender<io::Result<Vec<u8>>>) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        match source.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if raw.send(Ok(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = raw.send(Err(err));
                return;
            }
        }
    }
}

fn pump(
    name: &str,
    raw: Receiver<io::Result<Vec<u8>>>,
    out: SyncSender<Vec<u8>>,
    stop: Receiver<()>,
    poll_interval: Duration,
) -> ChunkResult {
    let mut drain_budget: Option<Duration> = None;
    loop {
        if drain_budget.is_none() {
            match stop.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => {
                    drain_budget = Some(poll_interval * DRAIN_POLLS);
                }
                Err(TryRecvError::Empty) => {}
            }
        }
        if drain_budget.is_some_and(|budget| budget.is_zero()) {
            tracing::warn!(stream = name, "source still producing after stop, giving up");
            return Ok(());
        }

        let waiting = Instant::now();
        let received = raw.recv_timeout(poll_interval);
        if let Some(budget) = drain_budget.as_mut() {
            *budget = budget.saturating_sub(waiting.elapsed());
        }

        match received {
            Ok(Ok(chunk)) => {
                if out.send(chunk).is_err() {
                    // Consumer is gone; nothing left to deliver to.
                    return Ok(());
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(stream = name, error = %err, "stream read failed");
                return Err(Arc::new(err));
            }
            Err(RecvTimeoutError::Timeout) => {
                if drain_budget.is_some() {
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    /// Never returns data and never reaches end-of-file.
    struct StalledReader(Receiver<()>);

    impl Read for StalledReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    fn options(chunk_size: usize) -> ChunkOptions {
        ChunkOptions {
            chunk_size,
            poll_interval: Duration::from_millis(10),
            capacity: 8,
        }
    }

    #[test]
    fn delivers_chunks_in_order_then_disconnects() {
        let (mut adapter, chunks) =
            ChunkChannel::spawn("test", Cursor::new(b"abcdefgh".to_vec()), &options(3)).unwrap();
        let collected: Vec<u8> = chunks.iter().flatten().collect();
        assert_eq!(collected, b"abcdefgh");
        assert!(adapter.stop().is_ok());
        assert!(adapter.is_finished());
    }

    #[test]
    fn chunks_respect_size_bound() {
        let (_adapter, chunks) =
            ChunkChannel::spawn("test", Cursor::new(vec![7u8; 10]), &options(4)).unwrap();
        assert!(chunks.iter().all(|chunk| chunk.len() <= 4));
    }

    #[test]
    fn read_error_is_surfaced_on_stop() {
        let (mut adapter, chunks) =
            ChunkChannel::spawn("test", FailingReader, &options(4)).unwrap();
        assert!(chunks.iter().next().is_none());
        let err = adapter.stop().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        // The outcome is cached, not re-awaited.
        assert!(adapter.stop().is_err());
    }

    #[test]
    fn slow_consumer_after_stop_loses_nothing() {
        let data: Vec<u8> = (0..=255u8).cycle().take(160).collect();
        let options = ChunkOptions {
            chunk_size: 4,
            poll_interval: Duration::from_millis(5),
            capacity: 1,
        };
        let (mut adapter, chunks) =
            ChunkChannel::spawn("test", Cursor::new(data.clone()), &options).unwrap();

        let consumer = thread::spawn(move || {
            let mut received = Vec::new();
            for chunk in chunks {
                thread::sleep(Duration::from_millis(10));
                received.extend_from_slice(&chunk);
            }
            received
        });
        // 40 chunks at 10ms each far outlast the 100ms drain budget.
        assert!(adapter.stop().is_ok());
        assert_eq!(consumer.join().unwrap(), data);
    }

    #[test]
    fn stop_returns_while_source_is_blocked() {
        let (release, blocked) = mpsc::channel();
        let (mut adapter, chunks) =
            ChunkChannel::spawn("test", StalledReader(blocked), &options(4)).unwrap();
        let started = Instant::now();
        assert!(adapter.stop().is_ok());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(chunks.recv().is_err());
        let _ = release.send(());
    }
}
