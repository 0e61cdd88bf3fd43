//! Process lifecycle: spawn, wire streams into the log, wait, close.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use portable_pty::MasterPty;

use crate::config::EngineConfig;
use crate::exec::chunk::ChunkChannel;
use crate::exec::error::{ExecError, ExitStatus};
use crate::exec::input::{ChannelSource, InputWriter};
use crate::exec::spawn::{spawn, ChildProcess, Spawned};
use crate::exec::spec::CommandSpec;
use crate::log::{LogWriter, StreamTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Created,
    Started,
    Running,
    Finished,
    Failed,
}

impl ExecState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecState::Finished | ExecState::Failed)
    }
}

/// A read or log-write failure on one stream. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFault {
    pub tag: StreamTag,
    pub message: String,
}

/// One adapter plus the thread that moves its chunks into the log.
struct Pipe {
    tag: StreamTag,
    adapter: ChunkChannel,
    forwarder: JoinHandle<()>,
}

/// A single child process whose streams are recorded into one log.
pub struct Execution {
    spec: CommandSpec,
    config: EngineConfig,
    log: Arc<LogWriter>,
    state: Mutex<ExecState>,
    spawn_error: Mutex<Option<ExecError>>,
    child: Mutex<Option<ChildProcess>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    pipes: Mutex<Vec<Pipe>>,
    input: InputWriter,
    faults: Arc<Mutex<Vec<StreamFault>>>,
    outcome: Mutex<Option<Result<(), ExecError>>>,
}

impl Execution {
    pub fn new(spec: CommandSpec, sink: impl Write + Send + 'static, config: EngineConfig) -> Self {
        let sink: Box<dyn Write + Send> = Box::new(sink);
        Self {
            spec,
            config,
            log: Arc::new(LogWriter::new(sink)),
            state: Mutex::new(ExecState::Created),
            spawn_error: Mutex::new(None),
            child: Mutex::new(None),
            master: Mutex::new(None),
            pipes: Mutex::new(Vec::new()),
            input: InputWriter::default(),
            faults: Arc::new(Mutex::new(Vec::new())),
            outcome: Mutex::new(None),
        }
    }

    /// Creates the log file (and its parent directories) at `path`.
    pub fn with_log_file(
        spec: CommandSpec,
        path: &Path,
        config: EngineConfig,
    ) -> Result<Self, ExecError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|err| ExecError::LogOpen(err.into()))?;
        }
        let file = File::create(path).map_err(|err| ExecError::LogOpen(err.into()))?;
        Ok(Self::new(spec, file, config))
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn state(&self) -> ExecState {
        *self.state.lock()
    }

    /// OS process id while the child is known.
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().and_then(ChildProcess::id)
    }

    /// Handle for interactive input. Writes fail before start and after exit.
    pub fn input(&self) -> InputWriter {
        self.input.clone()
    }

    /// Stream failures recorded so far.
    pub fn faults(&self) -> Vec<StreamFault> {
        self.faults.lock().clone()
    }

    /// Spawns the child and starts recording its streams.
    ///
    /// On failure the execution is `Failed`, no adapter runs and the log is
    /// closed with its terminal records.
    pub fn start(&self) -> Result<(), ExecError> {
        let mut state = self.state.lock();
        if *state != ExecState::Created {
            return Err(ExecError::AlreadyStarted);
        }
        *state = ExecState::Started;

        let result = spawn(&self.spec, self.config.pty_size()).and_then(|spawned| self.wire(spawned));
        match result {
            Ok(()) => {
                *state = ExecState::Running;
                tracing::info!(program = self.spec.program(), pid = ?self.pid(), "process running");
                Ok(())
            }
            Err(err) => {
                *state = ExecState::Failed;
                tracing::warn!(program = self.spec.program(), error = %err, "process failed to start");
                if let Err(close) = self.log.close() {
                    tracing::warn!(error = %close, "failed to close log after spawn error");
                }
                *self.spawn_error.lock() = Some(err.clone());
                Err(err)
            }
        }
    }

    fn wire(&self, spawned: Spawned) -> Result<(), ExecError> {
        let mut pipes = Vec::with_capacity(3);
        let wired = match spawned {
            Spawned::Piped {
                child,
                stdout,
                stderr,
                stdin,
            } => {
                *self.child.lock() = Some(child);
                let (tap, tapped) = mpsc::channel();
                self.input.attach(Box::new(stdin), Some(tap));
                self.attach(&mut pipes, StreamTag::Stdout, stdout)
                    .and_then(|_| self.attach(&mut pipes, StreamTag::Stderr, stderr))
                    .and_then(|_| {
                        self.attach(&mut pipes, StreamTag::Stdin, ChannelSource::new(tapped))
                    })
            }
            Spawned::Pty {
                child,
                master,
                output,
                input,
            } => {
                *self.child.lock() = Some(child);
                *self.master.lock() = Some(master);
                // The terminal echoes input into the combined output stream.
                self.input.attach(input, None);
                self.attach(&mut pipes, StreamTag::Stdout, output)
            }
        };

        if let Err(err) = wired {
            self.input.close();
            if let Some(child) = self.child.lock().as_mut() {
                if let Err(reap) = child.terminate() {
                    tracing::warn!(error = %reap, "failed to reap child after wiring error");
                }
            }
            for pipe in pipes {
                self.finish_pipe(pipe);
            }
            self.master.lock().take();
            return Err(err);
        }
        *self.pipes.lock() = pipes;
        Ok(())
    }

    fn attach<R>(&self, pipes: &mut Vec<Pipe>, tag: StreamTag, source: R) -> Result<(), ExecError>
    where
        R: std::io::Read + Send + 'static,
    {
        let stream_error = |err: std::io::Error| ExecError::Stream {
            stream: tag.to_string(),
            source: Arc::new(err),
        };
        let (adapter, chunks) = ChunkChannel::spawn(tag.as_str(), source, &self.config.chunk_options())
            .map_err(stream_error)?;

        let log = Arc::clone(&self.log);
        let faults = Arc::clone(&self.faults);
        let forwarder = thread::Builder::new()
            .name(format!("{tag}-log"))
            .spawn(move || {
                for chunk in chunks {
                    if let Err(err) = log.write(tag, &chunk) {
                        tracing::warn!(stream = %tag, error = %err, "failed to append to log");
                        faults.lock().push(StreamFault {
                            tag,
                            message: err.to_string(),
                        });
                    }
                }
            })
            .map_err(stream_error)?;

        pipes.push(Pipe {
            tag,
            adapter,
            forwarder,
        });
        Ok(())
    }

    /// Stops one adapter, waits for its acknowledgment, then for the forwarder
    /// to drain every chunk it delivered.
    fn finish_pipe(&self, mut pipe: Pipe) {
        if let Err(err) = pipe.adapter.stop() {
            self.faults.lock().push(StreamFault {
                tag: pipe.tag,
                message: err.to_string(),
            });
        }
        if pipe.forwarder.join().is_err() {
            tracing::warn!(stream = %pipe.tag, "log forwarder panicked");
        }
    }

    /// Blocks until the child exits, then stops every adapter, closes the log
    /// and returns the outcome.
    ///
    /// Returns [`ExecError::NotStarted`] immediately when called before
    /// [`Self::start`]. Once finished, every call returns the same outcome.
    pub fn wait(&self) -> Result<(), ExecError> {
        let mut outcome = self.outcome.lock();
        if let Some(result) = outcome.as_ref() {
            return result.clone();
        }

        match self.state() {
            ExecState::Created => return Err(ExecError::NotStarted),
            ExecState::Failed => {
                let err = self
                    .spawn_error
                    .lock()
                    .clone()
                    .unwrap_or(ExecError::NotStarted);
                *outcome = Some(Err(err.clone()));
                return Err(err);
            }
            _ => {}
        }

        let exit = self.wait_child();
        self.input.close();

        let pipes = std::mem::take(&mut *self.pipes.lock());
        for pipe in pipes {
            self.finish_pipe(pipe);
        }
        self.master.lock().take();

        let closed = self.log.close();
        let result = match (exit, closed) {
            (Err(err), closed) => {
                if let Err(close) = closed {
                    tracing::warn!(error = %close, "failed to close log");
                }
                Err(err)
            }
            (Ok(()), Err(close)) => Err(ExecError::LogClose(close)),
            (Ok(()), Ok(())) => Ok(()),
        };

        *self.state.lock() = if result.is_ok() {
            ExecState::Finished
        } else {
            ExecState::Failed
        };
        match &result {
            Ok(()) => tracing::info!(program = self.spec.program(), "process finished"),
            Err(err) => tracing::info!(program = self.spec.program(), error = %err, "process failed"),
        }
        *outcome = Some(result.clone());
        result
    }

    fn wait_child(&self) -> Result<(), ExecError> {
        let interval = self.config.poll_interval();
        loop {
            {
                let mut child = self.child.lock();
                let Some(child) = child.as_mut() else {
                    return Err(ExecError::NotStarted);
                };
                match child.try_wait() {
                    Ok(Some(status)) => return exit_result(status),
                    Ok(None) => {}
                    Err(err) => return Err(ExecError::Wait(Arc::new(err))),
                }
            }
            thread::sleep(interval);
        }
    }

    /// Kills the child if it is still running. [`Self::wait`] then reports
    /// the resulting exit status.
    pub fn kill(&self) -> Result<(), ExecError> {
        if self.state() != ExecState::Running {
            return Ok(());
        }
        let mut child = self.child.lock();
        let Some(child) = child.as_mut() else {
            return Err(ExecError::NotStarted);
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        tracing::info!(program = self.spec.program(), "killing process");
        child.kill().map_err(|err| ExecError::Wait(Arc::new(err)))
    }
}

fn exit_result(status: ExitStatus) -> Result<(), ExecError> {
    if status.success() {
        Ok(())
    } else {
        Err(ExecError::Exit(status))
    }
}
