//! Replays a process log into three independently readable streams.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::log::buffer::StreamBuffer;
use crate::log::error::LogError;
use crate::log::record::{LogRecord, StreamTag};

/// How the decode loop treats end-of-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// The writer may still be appending: retry at end-of-file.
    Follow,
    /// The log is complete: end-of-file before every terminal record is an error.
    AtRest,
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub mode: ReplayMode,
    /// Chunks each stream buffer holds before the decode loop blocks.
    pub capacity: usize,
    /// Delay between end-of-file retries in follow mode.
    pub retry_interval: Duration,
}

impl ReplayOptions {
    pub fn follow() -> Self {
        Self::default()
    }

    pub fn at_rest() -> Self {
        Self {
            mode: ReplayMode::AtRest,
            ..Self::default()
        }
    }
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            mode: ReplayMode::Follow,
            capacity: 64,
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// Fully drained contents of a replayed log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdin: Vec<u8>,
}

type Source = Box<dyn Read + Send>;

pub struct LogReader {
    source: Mutex<Option<Source>>,
    streams: [StreamBuffer; 3],
    options: ReplayOptions,
    stop: Arc<AtomicBool>,
    error: Arc<Mutex<Option<LogError>>>,
    decoder: Mutex<Option<JoinHandle<Result<(), LogError>>>>,
}

impl LogReader {
    /// Opens a log file, which may still be written to.
    pub fn open(path: impl AsRef<Path>, options: ReplayOptions) -> Result<Self, LogError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::from_reader(file, options))
    }

    pub fn from_reader(source: impl Read + Send + 'static, options: ReplayOptions) -> Self {
        let streams = [
            StreamBuffer::new(options.capacity),
            StreamBuffer::new(options.capacity),
            StreamBuffer::new(options.capacity),
        ];
        Self {
            source: Mutex::new(Some(Box::new(source))),
            streams,
            options,
            stop: Arc::new(AtomicBool::new(false)),
            error: Arc::new(Mutex::new(None)),
            decoder: Mutex::new(None),
        }
    }

    pub fn stdout(&self) -> StreamBuffer {
        self.stream(StreamTag::Stdout)
    }

    pub fn stderr(&self) -> StreamBuffer {
        self.stream(StreamTag::Stderr)
    }

    pub fn stdin(&self) -> StreamBuffer {
        self.stream(StreamTag::Stdin)
    }

    pub fn stream(&self, tag: StreamTag) -> StreamBuffer {
        self.streams[tag.index()].clone()
    }

    /// Starts the decode loop on its own thread. Later calls do nothing.
    pub fn start(&self) {
        let Some(source) = self.source.lock().take() else {
            return;
        };
        let streams = self.streams.clone();
        let options = self.options.clone();
        let stop = Arc::clone(&self.stop);
        let error = Arc::clone(&self.error);

        let handle = thread::Builder::new()
            .name("log-replay".to_string())
            .spawn(move || {
                let result = decode_loop(BufReader::new(source), &streams, &options, &stop);
                if let Err(err) = &result {
                    match err {
                        LogError::Cancelled => tracing::debug!("log replay cancelled"),
                        other => tracing::warn!(error = %other, "log replay halted"),
                    }
                    *error.lock() = Some(err.clone());
                    for stream in &streams {
                        stream.close();
                    }
                }
                result
            });

        match handle {
            Ok(handle) => *self.decoder.lock() = Some(handle),
            Err(err) => {
                *self.error.lock() = Some(err.into());
                for stream in &self.streams {
                    stream.close();
                }
            }
        }
    }

    /// The error that halted the decode loop, if any.
    pub fn error(&self) -> Option<LogError> {
        self.error.lock().clone()
    }

    /// Blocks until the decode loop ends and returns its outcome.
    pub fn wait(&self) -> Result<(), LogError> {
        let handle = self.decoder.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                *self.error.lock() = Some(LogError::Cancelled);
            }
        }
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Replays the whole log and drains all three streams.
    pub fn collect(&self) -> Result<Transcript, LogError> {
        self.start();
        let (stdout, stderr, stdin) = thread::scope(|scope| {
            let stdout = scope.spawn(|| self.stdout().read_all());
            let stderr = scope.spawn(|| self.stderr().read_all());
            let stdin = scope.spawn(|| self.stdin().read_all());
            (
                stdout.join().unwrap_or_default(),
                stderr.join().unwrap_or_default(),
                stdin.join().unwrap_or_default(),
            )
        });
        self.wait()?;
        Ok(Transcript {
            stdout,
            stderr,
            stdin,
        })
    }

    /// Asks the decode loop to stop and closes every stream, without waiting.
    ///
    /// Blocked readers wake up with end-of-stream.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::SeqCst);
        for stream in &self.streams {
            stream.close();
        }
    }

    /// Stops the decode loop, then releases the source.
    ///
    /// Streams are closed, so readers see end-of-stream after the chunks
    /// already queued.
    pub fn close(&self) -> Result<(), LogError> {
        self.cancel();
        let handle = self.decoder.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.source.lock().take();
        match self.error() {
            Some(LogError::Cancelled) | None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl Drop for LogReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn decode_loop(
    mut source: BufReader<Source>,
    streams: &[StreamBuffer; 3],
    options: &ReplayOptions,
    stop: &AtomicBool,
) -> Result<(), LogError> {
    let mut open = [true; 3];
    let mut line = Vec::new();

    while open.iter().any(|o| *o) {
        if stop.load(Ordering::SeqCst) {
            return Err(LogError::Cancelled);
        }
        source.read_until(b'\n', &mut line)?;
        if line.last() != Some(&b'\n') {
            match options.mode {
                ReplayMode::Follow => {
                    // Partial line or nothing yet: keep what we have and retry.
                    pause(options.retry_interval, stop);
                    continue;
                }
                ReplayMode::AtRest => {
                    if !line.is_empty() {
                        let record = LogRecord::from_line(&line)?;
                        line.clear();
                        dispatch(record, streams, &mut open, stop)?;
                    }
                    return match StreamTag::ALL.into_iter().find(|t| open[t.index()]) {
                        Some(tag) => Err(LogError::Truncated(tag)),
                        None => Ok(()),
                    };
                }
            }
        }
        let record = LogRecord::from_line(&line)?;
        line.clear();
        dispatch(record, streams, &mut open, stop)?;
    }
    Ok(())
}

fn dispatch(
    record: LogRecord,
    streams: &[StreamBuffer; 3],
    open: &mut [bool; 3],
    stop: &AtomicBool,
) -> Result<(), LogError> {
    let index = record.tag.index();
    if !open[index] {
        tracing::warn!(tag = %record.tag, "record after terminal record ignored");
        return Ok(());
    }
    let stream = &streams[index];
    if !stream.push(record.data) && stop.load(Ordering::SeqCst) {
        return Err(LogError::Cancelled);
    }
    if record.eof {
        stream.close();
        open[index] = false;
    }
    Ok(())
}

fn pause(interval: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline && !stop.load(Ordering::SeqCst) {
        thread::sleep(interval.min(Duration::from_millis(10)));
    }
}
