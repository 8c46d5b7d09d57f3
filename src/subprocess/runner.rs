use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::error::ProcessError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    pub suppress_stderr: bool,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
            suppress_stderr: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Fail with [`ProcessError::Timeout`] if a one-shot run takes longer
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Discard stderr instead of piping it
    pub fn suppress_stderr(mut self) -> Self {
        self.suppress_stderr = true;
        self
    }

    /// Render the command line for logs and error messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

pub type ProcessStreamItem = Result<String, ProcessError>;
pub type LineStream = Pin<Box<dyn Stream<Item = ProcessStreamItem> + Send>>;

/// Handle used to stop a long-running child whose stdout is being streamed
#[async_trait]
pub trait ProcessControl: Send {
    /// OS process id, if the child is still known to be running
    fn id(&self) -> Option<u32>;

    /// Ask the process to exit, then force-kill it once `grace` has elapsed
    async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ProcessError>;
}

pub struct ProcessStream {
    pub lines: LineStream,
    pub control: Box<dyn ProcessControl>,
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
    async fn run_streaming(&self, command: ProcessCommand) -> Result<ProcessStream, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    /// Normalize a line by removing trailing newlines
    fn normalize_line(mut line: String) -> String {
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        line
    }

    /// Create a line stream from a buffered reader.
    ///
    /// Invalid UTF-8 is replaced rather than treated as an error; device logs
    /// routinely carry truncated multi-byte sequences.
    fn create_line_stream<R>(reader: BufReader<R>) -> LineStream
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Box::pin(futures::stream::unfold(reader, |mut reader| async move {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => None,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    Some((Ok(Self::normalize_line(line)), reader))
                }
                Err(e) => Some((Err(ProcessError::Io(e)), reader)),
            }
        }))
    }

    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        if command.suppress_stderr {
            cmd.stderr(Stdio::null());
        } else {
            cmd.stderr(Stdio::piped());
        }
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn(command: &ProcessCommand) -> Result<tokio::process::Child, ProcessError> {
        tracing::debug!("Executing subprocess: {}", command.display());

        Self::configure_command(command).spawn().map_err(|e| {
            tracing::debug!(
                "Failed to spawn '{}': {:?} (kind: {:?})",
                command.program,
                e,
                e.kind()
            );
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::CommandNotFound(command.program.clone())
            } else {
                ProcessError::SpawnFailed {
                    command: command.display(),
                    source: e,
                }
            }
        })
    }

    /// Convert process exit status to our ExitStatus enum
    fn parse_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::parse_signal_status(status)
        }
    }

    #[cfg(unix)]
    fn parse_signal_status(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            ExitStatus::Signal(signal)
        } else {
            ExitStatus::Error(1)
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    fn log_result(result: &ProcessOutput, command: &ProcessCommand) {
        match &result.status {
            ExitStatus::Success => {
                tracing::debug!(
                    "Subprocess completed successfully in {:?}: {}",
                    result.duration,
                    command.display()
                );
            }
            ExitStatus::Error(code) => {
                tracing::debug!(
                    "Subprocess failed with exit code {} in {:?}: {}",
                    code,
                    result.duration,
                    command.display()
                );
                if !result.stderr.is_empty() {
                    tracing::trace!("Stderr: {}", result.stderr);
                }
            }
            ExitStatus::Signal(signal) => {
                tracing::warn!(
                    "Subprocess terminated by signal {} in {:?}: {}",
                    signal,
                    result.duration,
                    command.display()
                );
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let start = Instant::now();
        let child = Self::spawn(&command)?;

        let output = match command.timeout {
            Some(duration) => tokio::time::timeout(duration, child.wait_with_output())
                .await
                .map_err(|_| ProcessError::Timeout(duration))??,
            None => child.wait_with_output().await?,
        };

        let result = ProcessOutput {
            status: Self::parse_exit_status(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: if command.suppress_stderr {
                String::new()
            } else {
                String::from_utf8_lossy(&output.stderr).into_owned()
            },
            duration: start.elapsed(),
        };
        Self::log_result(&result, &command);
        Ok(result)
    }

    async fn run_streaming(&self, command: ProcessCommand) -> Result<ProcessStream, ProcessError> {
        let mut child = Self::spawn(&command)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::MissingPipe(command.display()))?;

        Ok(ProcessStream {
            lines: Self::create_line_stream(BufReader::new(stdout)),
            control: Box::new(TokioChildControl {
                child,
                command: command.display(),
            }),
        })
    }
}

struct TokioChildControl {
    child: tokio::process::Child,
    command: String,
}

impl TokioChildControl {
    #[cfg(unix)]
    fn request_exit(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!("SIGTERM to '{}' ({}) failed: {}", self.command, pid, e);
            }
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        let _ = self.child.start_kill();
    }
}

#[async_trait]
impl ProcessControl for TokioChildControl {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ProcessError> {
        self.request_exit();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(TokioProcessRunner::parse_exit_status(status?)),
            Err(_) => {
                tracing::warn!(
                    "'{}' did not exit within {:?}, killing it",
                    self.command,
                    grace
                );
                self.child.kill().await?;
                Ok(TokioProcessRunner::parse_exit_status(
                    self.child.wait().await?,
                ))
            }
        }
    }
}
