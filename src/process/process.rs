use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::exec::{CommandSpec, ExecError, ExecMode, Execution};
use crate::log::{LogReader, ReplayMode};

/// What a caller submits: a named sequence of commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    #[serde(default)]
    pub dir: String,
    /// Each entry is an argv list: program first.
    pub commands: Vec<Vec<String>>,
    #[serde(default)]
    pub pty: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    /// Converts every argv list into a [`CommandSpec`].
    pub fn command_specs(&self) -> Result<Vec<CommandSpec>, ExecError> {
        if self.commands.is_empty() {
            return Err(ExecError::InvalidCommand("no commands given".to_string()));
        }
        self.commands
            .iter()
            .enumerate()
            .map(|(i, argv)| {
                let mut spec = CommandSpec::from_argv(argv).ok_or_else(|| {
                    ExecError::InvalidCommand(format!("command {} is empty", i + 1))
                })?;
                if !self.dir.is_empty() {
                    spec = spec.dir(&self.dir);
                }
                for (key, value) in &self.env {
                    spec = spec.env(key, value);
                }
                if self.pty {
                    spec = spec.mode(ExecMode::Pty);
                }
                Ok(spec)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Created,
    Running,
    Finished,
    Failed,
}

/// Serializable snapshot of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessView {
    pub id: String,
    pub name: String,
    pub dir: String,
    pub commands: Vec<Vec<String>>,
    pub state: ProcessState,
    pub running: bool,
    pub finished: bool,
    pub pty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stream read and log write failures, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<String>,
}

/// A submitted job: runs its commands one after another, each into its own
/// log, and keeps their combined output.
pub struct Process {
    id: String,
    spec: ProcessSpec,
    commands: Vec<CommandSpec>,
    state: Mutex<ProcessState>,
    error: Mutex<Option<String>>,
    faults: Mutex<Vec<String>>,
    output: Mutex<Vec<u8>>,
    current: Mutex<Option<Arc<Execution>>>,
    killed: AtomicBool,
}

impl Process {
    pub fn new(id: String, spec: ProcessSpec) -> Result<Self, ExecError> {
        let commands = spec.command_specs()?;
        Ok(Self {
            id,
            spec,
            commands,
            state: Mutex::new(ProcessState::Created),
            error: Mutex::new(None),
            faults: Mutex::new(Vec::new()),
            output: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            killed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    /// Stdout then stderr of every command that has finished so far.
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    /// Stream faults of every command run so far, as `command n stream: message`.
    pub fn faults(&self) -> Vec<String> {
        self.faults.lock().clone()
    }

    /// Log file of command `index` (1-based) under `log_dir`.
    pub fn log_path(&self, log_dir: &Path, index: usize) -> PathBuf {
        log_dir.join(&self.id).join(index.to_string())
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn view(&self) -> ProcessView {
        let state = self.state();
        ProcessView {
            id: self.id.clone(),
            name: self.spec.name.clone(),
            dir: self.spec.dir.clone(),
            commands: self.spec.commands.clone(),
            state,
            running: state == ProcessState::Running,
            finished: matches!(state, ProcessState::Finished | ProcessState::Failed),
            pty: self.spec.pty,
            error: self.error.lock().clone(),
            faults: self.faults(),
        }
    }

    /// Moves the process from `Created` to `Running`. A process runs once.
    pub fn claim(&self) -> Result<(), ExecError> {
        let mut state = self.state.lock();
        if *state != ProcessState::Created {
            return Err(ExecError::AlreadyStarted);
        }
        *state = ProcessState::Running;
        Ok(())
    }

    /// Claims the process and runs all of its commands.
    pub fn run(&self, log_dir: &Path, config: &EngineConfig) -> Result<(), ExecError> {
        self.claim()?;
        self.execute(log_dir, config)
    }

    /// Runs the commands of a claimed process, stopping at the first failure.
    ///
    /// Blocks until the last command has exited.
    pub fn execute(&self, log_dir: &Path, config: &EngineConfig) -> Result<(), ExecError> {
        if self.state() != ProcessState::Running {
            return Err(ExecError::NotStarted);
        }
        let result = self.execute_all(log_dir, config);
        let mut state = self.state.lock();
        match &result {
            Ok(()) => *state = ProcessState::Finished,
            Err(err) => {
                *state = ProcessState::Failed;
                *self.error.lock() = Some(err.to_string());
            }
        }
        result
    }

    fn execute_all(&self, log_dir: &Path, config: &EngineConfig) -> Result<(), ExecError> {
        for (i, spec) in self.commands.iter().enumerate() {
            if self.killed.load(Ordering::SeqCst) {
                return Err(ExecError::Aborted);
            }
            let path = self.log_path(log_dir, i + 1);
            tracing::info!(id = %self.id, command = i + 1, log = %path.display(), "starting command");

            let execution = Arc::new(Execution::with_log_file(spec.clone(), &path, config.clone())?);
            *self.current.lock() = Some(Arc::clone(&execution));
            let result = execution.start().and_then(|_| {
                // A kill that found no current execution lands here.
                if self.killed.load(Ordering::SeqCst) {
                    execution.kill()?;
                }
                execution.wait()
            });
            self.current.lock().take();

            self.faults.lock().extend(
                execution
                    .faults()
                    .into_iter()
                    .map(|fault| format!("command {} {}: {}", i + 1, fault.tag, fault.message)),
            );

            self.capture(&path, config);
            result?;
        }
        Ok(())
    }

    /// Appends the stdout and stderr recorded in a finished log.
    fn capture(&self, path: &Path, config: &EngineConfig) {
        let transcript = LogReader::open(path, config.replay_options(ReplayMode::AtRest))
            .and_then(|reader| reader.collect());
        match transcript {
            Ok(transcript) => {
                let mut output = self.output.lock();
                output.extend_from_slice(&transcript.stdout);
                output.extend_from_slice(&transcript.stderr);
            }
            Err(err) => {
                tracing::warn!(id = %self.id, log = %path.display(), error = %err, "failed to capture output")
            }
        }
    }

    /// Sends input to the command currently running.
    pub fn write_input(&self, bytes: &[u8]) -> io::Result<usize> {
        let current = self.current.lock().clone();
        match current {
            Some(execution) => execution.input().send(bytes),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "no command is running",
            )),
        }
    }

    /// Kills the running command and skips the remaining ones.
    pub fn kill(&self) -> Result<(), ExecError> {
        self.killed.store(true, Ordering::SeqCst);
        let current = self.current.lock().clone();
        match current {
            Some(execution) => execution.kill(),
            None => Ok(()),
        }
    }
}
