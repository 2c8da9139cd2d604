use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SliceError};
use crate::subprocess::{ExitStatus, OutputSink, ProcessCommand};

/// One independent command submitted to the dispatcher.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub command: ProcessCommand,
    /// Explicit output sink. When unset the dispatcher gives the task its
    /// own log file.
    pub sink: Option<OutputSink>,
}

impl Task {
    pub fn new(id: impl Into<String>, command: ProcessCommand) -> Self {
        Self {
            id: id.into(),
            command,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

/// Lifecycle of a task inside its chunk.
///
/// `Terminated` is only ever reached because a sibling in the same chunk
/// moved to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Terminated,
}

impl TaskState {
    pub fn from_exit(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => TaskState::Completed,
            ExitStatus::Terminated => TaskState::Terminated,
            ExitStatus::Error(_) | ExitStatus::Signal(_) => TaskState::Failed,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Terminated
        )
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub task_id: String,
    pub exit_code: i32,
    pub state: TaskState,
    pub elapsed: Duration,
    pub log: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub job: String,
    /// Highest exit code among tasks that ran to completion. Tasks we
    /// terminated do not contribute.
    pub max_exit_code: i32,
    pub results: Vec<ExecutionResult>,
    pub dispatched_chunks: usize,
}

impl BatchResult {
    pub(crate) fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            max_exit_code: 0,
            results: Vec::new(),
            dispatched_chunks: 0,
        }
    }

    pub(crate) fn absorb(&mut self, results: Vec<ExecutionResult>) {
        for result in results {
            if result.state != TaskState::Terminated {
                self.max_exit_code = self.max_exit_code.max(result.exit_code);
            }
            self.results.push(result);
        }
    }

    pub fn is_success(&self) -> bool {
        self.max_exit_code == 0
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results
            .iter()
            .filter(|r| r.state == TaskState::Failed)
    }

    /// Converts a failed batch into [`SliceError::AggregateFailure`].
    pub fn ensure_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SliceError::AggregateFailure {
                job: self.job,
                max_exit_code: self.max_exit_code,
                dispatched_chunks: self.dispatched_chunks,
            })
        }
    }
}
