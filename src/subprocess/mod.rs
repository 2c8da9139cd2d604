pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;


pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{
    shutdown_channel, ExitStatus, OutputSink, ProcessCommand, ProcessOutput, ProcessRunner,
    Shutdown, ShutdownTrigger, TokioProcessRunner,
};

use std::sync::Arc;

/// Runs single commands on behalf of workflows, honoring dry-run mode.
///
/// In dry-run mode nothing is spawned: [`CommandExecutor::execute`] reports
/// success and [`CommandExecutor::execute_for_value`] hands back the
/// caller's placeholder.
#[derive(Clone)]
pub struct CommandExecutor {
    runner: Arc<dyn ProcessRunner>,
    dry_run: bool,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, dry_run: bool) -> Self {
        Self { runner, dry_run }
    }

    pub fn production(dry_run: bool) -> Self {
        Self::new(Arc::new(TokioProcessRunner), dry_run)
    }

    #[cfg(test)]
    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner, false), mock)
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Runs `command` with its output streamed to the terminal.
    pub async fn execute(&self, command: &ProcessCommand, task: &str) -> Result<i32, ProcessError> {
        self.execute_to_sink(command, task, OutputSink::Inherit).await
    }

    /// Runs `command` with its combined output written to `sink` and returns
    /// the exit code.
    pub async fn execute_to_sink(
        &self,
        command: &ProcessCommand,
        task: &str,
        sink: OutputSink,
    ) -> Result<i32, ProcessError> {
        tracing::info!("Task: `{}` is implemented by `{}`", task, command.script);
        if self.dry_run {
            return Ok(0);
        }

        let status = self
            .runner
            .run_to_sink(command.clone(), sink, Shutdown::never())
            .await?;
        if !status.success() {
            tracing::error!("Task {} failed with {}", task, status.code());
        }
        Ok(status.code())
    }

    /// Runs `command` and returns its exit code with the captured stdout.
    pub async fn execute_for_value(
        &self,
        command: &ProcessCommand,
        task: &str,
        dry_run_placeholder: &str,
    ) -> Result<(i32, String), ProcessError> {
        tracing::debug!("Task: `{}` is implemented by `{}`", task, command.script);
        if self.dry_run {
            return Ok((0, dry_run_placeholder.to_string()));
        }

        let output = self.runner.run(command.clone()).await?;
        let code = output.status.code();
        if code != 0 {
            tracing::error!(
                "Task {} failed with {}: {}",
                task,
                code,
                output.stderr.trim_end()
            );
        }
        Ok((code, output.stdout))
    }
}
