//! Native tool invocation.
//!
//! Backends never spawn processes themselves; they describe an
//! [`Invocation`] and hand it to the [`CommandRunner`] they were built with.
//! [`SystemRunner`] is the real implementation. Tests substitute scripted or
//! counting runners.

use std::{
    ffi::{OsStr, OsString},
    fmt,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
};

use utils::shell::resolve_executable_path_blocking;

use crate::error::VcsError;

/// A native command line plus the environment it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Space-joined command line, for logs and error messages
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    fn to_command(&self) -> Result<Command, VcsError> {
        let program = resolve_executable_path_blocking(&self.program).ok_or_else(|| {
            VcsError::BackendCommandFailed {
                command: self.command_line(),
                code: None,
                stderr: format!("{} executable not found", self.program),
            }
        })?;
        let mut cmd = Command::new(program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        Ok(cmd)
    }

    fn spawn_error(&self, err: std::io::Error) -> VcsError {
        VcsError::BackendCommandFailed {
            command: self.command_line(),
            code: None,
            stderr: err.to_string(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Turn a non-zero exit into `BackendCommandFailed`
    pub fn check(self, invocation: &Invocation) -> Result<Vec<u8>, VcsError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(VcsError::BackendCommandFailed {
                command: invocation.command_line(),
                code: self.status,
                stderr: self.stderr_text(),
            })
        }
    }
}

/// Synchronous "run command, capture output" capability
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run to completion. A non-zero exit is reported in the output, not as
    /// an error; only failing to start the process is an error.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, VcsError>;

    /// Stream `producer`'s stdout into `consumer`'s stdin. Either side
    /// exiting non-zero is an error.
    fn pipe(&self, producer: &Invocation, consumer: &Invocation) -> Result<(), VcsError>;
}

/// Runs commands as child processes of the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, VcsError> {
        let mut cmd = invocation.to_command()?;
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::trace!(cwd = ?invocation.cwd, "Running command: {}", invocation);

        let output = cmd.output().map_err(|e| invocation.spawn_error(e))?;
        let result = CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        };
        if !result.success() {
            tracing::trace!(
                code = ?result.status,
                stderr = %result.stderr_text(),
                "Command exited unsuccessfully: {}",
                invocation
            );
        }
        Ok(result)
    }

    fn pipe(&self, producer: &Invocation, consumer: &Invocation) -> Result<(), VcsError> {
        let mut producer_cmd = producer.to_command()?;
        let mut consumer_cmd = consumer.to_command()?;

        tracing::trace!("Running pipeline: {} | {}", producer, consumer);

        let mut producer_child = producer_cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| producer.spawn_error(e))?;

        let producer_stdout = producer_child.stdout.take().ok_or_else(|| {
            VcsError::BackendCommandFailed {
                command: producer.command_line(),
                code: None,
                stderr: "stdout was not captured".into(),
            }
        })?;

        // Drain the producer's stderr while the consumer runs so a noisy
        // producer cannot block on a full pipe
        let stderr_pipe = producer_child.stderr.take();
        let stderr_reader = thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr_pipe {
                stderr.read_to_end(&mut buf)?;
            }
            Ok(buf)
        });

        let consumer_output = consumer_cmd
            .stdin(Stdio::from(producer_stdout))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .and_then(|child| child.wait_with_output());

        let producer_stderr = stderr_reader.join().map_err(|_| VcsError::BackendCommandFailed {
            command: producer.command_line(),
            code: None,
            stderr: "stderr reader panicked".into(),
        })??;
        let producer_status = producer_child.wait()?;

        let consumer_output = consumer_output.map_err(|e| consumer.spawn_error(e))?;

        CommandOutput {
            status: producer_status.code(),
            stdout: Vec::new(),
            stderr: producer_stderr,
        }
        .check(producer)?;
        CommandOutput {
            status: consumer_output.status.code(),
            stdout: Vec::new(),
            stderr: consumer_output.stderr,
        }
        .check(consumer)?;
        Ok(())
    }
}
