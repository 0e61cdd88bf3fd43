//! Live log tailing as an HTTP body stream.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use axum::body::Bytes;
use futures_core::Stream;
use tokio::sync::mpsc;

use crate::log::{LogError, LogReader, ReplayOptions, StreamBuffer, StreamTag};

const TAIL_CHANNEL_SIZE: usize = 16;
const TAIL_READ_SIZE: usize = 8192;

/// Body stream fed by a blocking log follower.
///
/// Dropping it (the client went away) cancels the follower, even while the
/// followed stream is idle.
pub struct LogStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    reader: Arc<LogReader>,
}

impl LogStream {
    /// Follows the log at `path` and streams the bytes of `tag`.
    ///
    /// The other two streams are drained and dropped so the decode loop never
    /// stalls on them.
    pub fn follow(path: &Path, tag: StreamTag, options: ReplayOptions) -> Result<Self, LogError> {
        let reader = Arc::new(LogReader::open(path, options)?);
        reader.start();
        for other in StreamTag::ALL.into_iter().filter(|t| *t != tag) {
            let buffer = reader.stream(other);
            thread::spawn(move || discard(buffer));
        }

        let (tx, rx) = mpsc::channel(TAIL_CHANNEL_SIZE);
        let worker = Arc::clone(&reader);
        let log = path.display().to_string();
        tokio::task::spawn_blocking(move || {
            let stream = worker.stream(tag);
            let mut buf = vec![0u8; TAIL_READ_SIZE];
            loop {
                let n = stream.read_into(&mut buf);
                if n == 0 {
                    break;
                }
                if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                    break;
                }
            }
            if tx.is_closed() {
                tracing::debug!(log = %log, "tail client went away");
                let _ = worker.close();
                return;
            }
            if let Err(err) = worker.wait() {
                let _ = tx.blocking_send(Err(io::Error::other(err.to_string())));
            }
        });
        Ok(Self { rx, reader })
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.reader.cancel();
    }
}

fn discard(buffer: StreamBuffer) {
    let mut buf = [0u8; 1024];
    while buffer.read_into(&mut buf) > 0 {}
}

impl Stream for LogStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogWriter;
    use std::fs::File;
    use std::time::{Duration, Instant};

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_an_idle_tail_stops_the_follower() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idle");
        let writer = LogWriter::new(File::create(&path).unwrap());
        writer.write(StreamTag::Stdout, b"first").unwrap();

        let mut stream = LogStream::follow(&path, StreamTag::Stdout, ReplayOptions::follow()).unwrap();
        let first = std::future::poll_fn(|cx| Pin::new(&mut stream).poll_next(cx)).await;
        assert_eq!(first.unwrap().unwrap(), Bytes::from_static(b"first"));

        let stdout = stream.reader.stdout();
        let reader = Arc::downgrade(&stream.reader);
        drop(stream);
        assert!(stdout.is_closed());

        // The worker lets go of the reader without any further writes.
        let started = Instant::now();
        while reader.upgrade().is_some() {
            assert!(started.elapsed() < Duration::from_secs(5), "follower still running");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
