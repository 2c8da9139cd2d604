use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::error::ProcessError;

/// How long a terminated process group gets to exit before it is killed outright.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// A shell command line, run through `sh -c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub script: String,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            env: HashMap::new(),
            working_dir: None,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
    /// Stopped by us after a sibling failed.
    Terminated,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    /// True for a genuine failure of the command itself. A termination we
    /// requested is not a failure of the task that received it.
    pub fn is_failure(&self) -> bool {
        matches!(self, ExitStatus::Error(_) | ExitStatus::Signal(_))
    }

    /// Shell-style exit code: signals map to `128 + signal`.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Error(code) => *code,
            ExitStatus::Signal(signal) => 128 + signal,
            ExitStatus::Terminated => 128 + nix::sys::signal::Signal::SIGTERM as i32,
        }
    }
}

/// Where a streamed command writes its stdout and stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    Inherit,
    Null,
    /// Both streams appended to one file owned by a single task.
    File(PathBuf),
}

impl OutputSink {
    fn stdio(&self) -> Result<(Stdio, Stdio), ProcessError> {
        match self {
            OutputSink::Inherit => Ok((Stdio::inherit(), Stdio::inherit())),
            OutputSink::Null => Ok((Stdio::null(), Stdio::null())),
            OutputSink::File(path) => {
                let sink_error = |source| ProcessError::Sink {
                    path: path.display().to_string(),
                    source,
                };
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(sink_error)?;
                let err_file = file.try_clone().map_err(sink_error)?;
                Ok((Stdio::from(file), Stdio::from(err_file)))
            }
        }
    }
}

/// Fires the [`Shutdown`] signal for every clone that was handed out.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn fire(&self) {
        self.0.send_replace(true);
    }
}

/// Per-chunk termination signal observed by running commands.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_fired(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the trigger fires. Pends forever if the trigger is
    /// dropped without firing.
    pub async fn wait(&mut self) {
        let fired = self.0.wait_for(|fired| *fired).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), Shutdown(rx))
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the command to completion and buffers its output.
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;

    /// Runs the command with its output written to `sink`. If `shutdown`
    /// fires while the command is still running, the process group is sent
    /// SIGTERM and the call resolves with [`ExitStatus::Terminated`]. A
    /// command that already exited reports its own status.
    async fn run_to_sink(
        &self,
        command: ProcessCommand,
        sink: OutputSink,
        shutdown: Shutdown,
    ) -> Result<ExitStatus, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn log_command_start(command: &ProcessCommand) {
        tracing::debug!("Executing subprocess: {}", command.script);

        if !command.env.is_empty() {
            tracing::trace!("Environment variables: {:?}", command.env);
        }
        if let Some(ref dir) = command.working_dir {
            tracing::trace!("Working directory: {:?}", dir);
        }
    }

    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command.script);

        // Own process group so a termination reaches everything the shell started
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.kill_on_drop(true);
        cmd
    }

    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound("sh".to_string())
        } else {
            ProcessError::SpawnFailed {
                command: command.script.clone(),
                source: error,
            }
        }
    }

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
        match status.signal() {
            Some(signal) => ExitStatus::Signal(signal),
            None => ExitStatus::Error(1),
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    /// SIGTERM to the whole process group, then SIGKILL if it outlives the grace period.
    async fn terminate(child: &mut tokio::process::Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(-(pid as i32));
            let _ = kill(pgid, Signal::SIGTERM);

            if tokio::time::timeout(TERMINATION_GRACE, child.wait())
                .await
                .is_ok()
            {
                return;
            }
            tracing::warn!("Process group {} ignored SIGTERM, killing it", pid);
            let _ = kill(pgid, Signal::SIGKILL);
        }

        let _ = child.kill().await;
    }

    fn log_result(result: &ProcessOutput, command: &ProcessCommand) {
        match &result.status {
            ExitStatus::Success => {
                tracing::debug!(
                    "Subprocess completed successfully in {:?}: {}",
                    result.duration,
                    command.script
                );
                tracing::trace!("Stdout length: {} bytes", result.stdout.len());
            }
            ExitStatus::Error(code) => {
                tracing::debug!(
                    "Subprocess failed with exit code {} in {:?}: {}",
                    code,
                    result.duration,
                    command.script
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
                    command.script
                );
            }
            ExitStatus::Terminated => {
                tracing::debug!("Subprocess terminated on request: {}", command.script);
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let start = Instant::now();
        Self::log_command_start(&command);

        let mut cmd = Self::configure_command(&command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command))?;
        let output = child.wait_with_output().await?;

        let result = ProcessOutput {
            status: Self::parse_exit_status(output.status),
            stdout: String::from_utf8(output.stdout)?,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        };

        Self::log_result(&result, &command);
        Ok(result)
    }

    async fn run_to_sink(
        &self,
        command: ProcessCommand,
        sink: OutputSink,
        mut shutdown: Shutdown,
    ) -> Result<ExitStatus, ProcessError> {
        Self::log_command_start(&command);

        let (stdout, stderr) = sink.stdio()?;
        let mut cmd = Self::configure_command(&command);
        cmd.stdin(Stdio::null()).stdout(stdout).stderr(stderr);

        let mut child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command))?;

        tokio::select! {
            biased;
            status = child.wait() => Ok(Self::parse_exit_status(status?)),
            _ = shutdown.wait() => {
                // A child that already exited keeps its own status
                if let Ok(Some(status)) = child.try_wait() {
                    return Ok(Self::parse_exit_status(status));
                }
                tracing::debug!("Terminating subprocess: {}", command.script);
                Self::terminate(&mut child).await;
                Ok(ExitStatus::Terminated)
            }
        }
    }
}
