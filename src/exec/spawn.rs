//! Spawning a child in pipe or pseudo-terminal mode.

use std::io::{self, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use portable_pty::{native_pty_system, Child as PtyChild, CommandBuilder, MasterPty, PtySize};

use crate::exec::error::{ExecError, ExitStatus};
use crate::exec::spec::{CommandSpec, ExecMode};

/// What a successful spawn hands back to the engine.
pub(crate) enum Spawned {
    Piped {
        child: ChildProcess,
        stdout: ChildStdout,
        stderr: ChildStderr,
        stdin: ChildStdin,
    },
    Pty {
        child: ChildProcess,
        master: Box<dyn MasterPty + Send>,
        output: PtyOutput,
        input: Box<dyn Write + Send>,
    },
}

/// A spawned child, whichever way it was started.
pub(crate) enum ChildProcess {
    Piped(Child),
    Pty(Box<dyn PtyChild + Send + Sync>),
}

impl ChildProcess {
    pub(crate) fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        match self {
            ChildProcess::Piped(child) => Ok(child.try_wait()?.map(ExitStatus::from_std)),
            ChildProcess::Pty(child) => Ok(child
                .try_wait()?
                .map(|status| ExitStatus::from_code(status.exit_code() as i32))),
        }
    }

    pub(crate) fn kill(&mut self) -> io::Result<()> {
        match self {
            ChildProcess::Piped(child) => child.kill(),
            ChildProcess::Pty(child) => child.kill(),
        }
    }

    /// Kills the child and reaps it so no zombie is left behind.
    pub(crate) fn terminate(&mut self) -> io::Result<ExitStatus> {
        if let Err(err) = self.kill() {
            tracing::debug!(error = %err, "kill before reap failed");
        }
        match self {
            ChildProcess::Piped(child) => Ok(ExitStatus::from_std(child.wait()?)),
            ChildProcess::Pty(child) => Ok(ExitStatus::from_code(child.wait()?.exit_code() as i32)),
        }
    }

    pub(crate) fn id(&self) -> Option<u32> {
        match self {
            ChildProcess::Piped(child) => Some(child.id()),
            ChildProcess::Pty(child) => child.process_id(),
        }
    }
}

/// The pty master's read side. On Linux the master reports `EIO` once the
/// last tty descriptor is closed; that is the end of the stream, not a fault.
pub(crate) struct PtyOutput(Box<dyn Read + Send>);

impl Read for PtyOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf) {
            #[cfg(unix)]
            Err(err) if err.raw_os_error() == Some(libc::EIO) => Ok(0),
            other => other,
        }
    }
}

pub(crate) fn spawn(spec: &CommandSpec, pty_size: PtySize) -> Result<Spawned, ExecError> {
    if spec.program().is_empty() {
        return Err(ExecError::InvalidCommand("empty program".to_string()));
    }
    match spec.exec_mode() {
        ExecMode::Pipe => spawn_piped(spec),
        ExecMode::Pty => spawn_pty(spec, pty_size),
    }
}

fn spawn_piped(spec: &CommandSpec) -> Result<Spawned, ExecError> {
    let mut command = Command::new(spec.program());
    command
        .args(spec.arguments())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = spec.working_dir() {
        command.current_dir(dir);
    }
    if spec.clears_env() {
        command.env_clear();
    }
    command.envs(spec.env_overrides());

    let mut child = command.spawn().map_err(|err| spawn_error(spec, err))?;
    let pipes = (child.stdout.take(), child.stderr.take(), child.stdin.take());
    let (Some(stdout), Some(stderr), Some(stdin)) = pipes else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(spawn_error(spec, "standard streams were not captured"));
    };
    tracing::debug!(program = spec.program(), pid = child.id(), "spawned with pipes");

    Ok(Spawned::Piped {
        child: ChildProcess::Piped(child),
        stdout,
        stderr,
        stdin,
    })
}

fn spawn_pty(spec: &CommandSpec, size: PtySize) -> Result<Spawned, ExecError> {
    let pair = native_pty_system()
        .openpty(size)
        .map_err(|err| ExecError::Pty(err.to_string()))?;

    let mut command = CommandBuilder::new(spec.program());
    command.args(spec.arguments());
    match spec.working_dir() {
        Some(dir) => command.cwd(dir),
        None => {
            let cwd = std::env::current_dir().map_err(|err| spawn_error(spec, err))?;
            command.cwd(cwd);
        }
    }
    if spec.clears_env() {
        command.env_clear();
    }
    for (key, value) in spec.env_overrides() {
        command.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(command)
        .map_err(|err| spawn_error(spec, err))?;
    // The child holds the tty now; keeping ours open would hide its exit.
    drop(pair.slave);

    let master = pair.master;
    let reader = master
        .try_clone_reader()
        .map_err(|err| ExecError::Pty(err.to_string()))?;
    let writer = master
        .take_writer()
        .map_err(|err| ExecError::Pty(err.to_string()))?;
    tracing::debug!(
        program = spec.program(),
        pid = child.process_id(),
        "spawned on pseudo-terminal"
    );

    Ok(Spawned::Pty {
        child: ChildProcess::Pty(child),
        master,
        output: PtyOutput(reader),
        input: writer,
    })
}

fn spawn_error(spec: &CommandSpec, reason: impl ToString) -> ExecError {
    ExecError::Spawn {
        program: spec.program().to_string(),
        reason: reason.to_string(),
    }
}
