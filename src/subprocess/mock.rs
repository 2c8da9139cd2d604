use async_trait::async_trait;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{
    ExitStatus, OutputSink, ProcessCommand, ProcessOutput, ProcessRunner, Shutdown,
};

/// Scripted [`ProcessRunner`] for tests.
///
/// Expectations are matched in registration order against the command
/// script by substring. An expectation limited with [`MockCommandConfig::times`]
/// stops matching once used up, so later expectations for the same pattern
/// take over; this is how a sequence of outcomes is scripted.
#[derive(Clone, Default)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
    terminated: Arc<Mutex<Vec<ProcessCommand>>>,
}

struct MockExpectation {
    pattern: String,
    response: ProcessOutput,
    delay: Option<Duration>,
    hangs: bool,
    times_called: usize,
    expected_times: Option<usize>,
}

impl MockExpectation {
    fn matches(&self, script: &str) -> bool {
        let exhausted = self
            .expected_times
            .is_some_and(|limit| self.times_called >= limit);
        !exhausted && script.contains(&self.pattern)
    }
}

#[derive(Clone)]
struct Scripted {
    response: ProcessOutput,
    delay: Option<Duration>,
    hangs: bool,
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an expectation for any command whose script contains `pattern`.
    pub fn expect_command(&mut self, pattern: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                pattern: pattern.to_string(),
                response: ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::from_millis(10),
                },
                delay: None,
                hangs: false,
                times_called: 0,
                expected_times: None,
            },
        }
    }

    pub fn verify_called(&self, pattern: &str, times: usize) -> bool {
        self.count_calls(pattern) == times
    }

    pub fn count_calls(&self, pattern: &str) -> usize {
        lock(&self.call_history)
            .iter()
            .filter(|cmd| cmd.script.contains(pattern))
            .count()
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        lock(&self.call_history).clone()
    }

    /// Scripts of every invocation, in call order.
    pub fn scripts(&self) -> Vec<String> {
        lock(&self.call_history)
            .iter()
            .map(|cmd| cmd.script.clone())
            .collect()
    }

    /// Commands that were still running when their shutdown signal fired.
    pub fn terminated(&self) -> Vec<ProcessCommand> {
        lock(&self.terminated).clone()
    }

    fn respond(&self, command: &ProcessCommand) -> Result<Scripted, ProcessError> {
        lock(&self.call_history).push(command.clone());

        let mut expectations = lock(&self.expectations);
        let expectation = expectations
            .iter_mut()
            .find(|e| e.matches(&command.script))
            .ok_or_else(|| {
                ProcessError::MockExpectationNotMet(format!(
                    "No expectation found for command: {}",
                    command.script
                ))
            })?;

        expectation.times_called += 1;
        Ok(Scripted {
            response: expectation.response.clone(),
            delay: expectation.delay,
            hangs: expectation.hangs,
        })
    }

    fn record_termination(&self, command: &ProcessCommand) {
        lock(&self.terminated).push(command.clone());
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let scripted = self.respond(&command)?;
        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(scripted.response)
    }

    async fn run_to_sink(
        &self,
        command: ProcessCommand,
        sink: OutputSink,
        mut shutdown: Shutdown,
    ) -> Result<ExitStatus, ProcessError> {
        let scripted = self.respond(&command)?;

        if scripted.hangs {
            shutdown.wait().await;
            self.record_termination(&command);
            return Ok(ExitStatus::Terminated);
        }

        if let Some(delay) = scripted.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait() => {
                    self.record_termination(&command);
                    return Ok(ExitStatus::Terminated);
                }
            }
        }

        if let OutputSink::File(path) = &sink {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            file.write_all(scripted.response.stdout.as_bytes())?;
        }

        Ok(scripted.response.status)
    }
}

impl MockCommandConfig {
    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.expectation.response.stdout = stdout.to_string();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.expectation.response.stderr = stderr.to_string();
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.response.status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn returns_success(mut self) -> Self {
        self.expectation.response.status = ExitStatus::Success;
        self
    }

    /// Completes only after `delay`, unless terminated first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.expectation.delay = Some(delay);
        self
    }

    /// Never completes on its own; only a shutdown signal ends it.
    pub fn hangs(mut self) -> Self {
        self.expectation.hangs = true;
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        lock(&self.runner.expectations).push(self.expectation);
    }
}
