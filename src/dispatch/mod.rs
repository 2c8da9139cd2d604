//! Bounded-parallelism execution of independent commands.
//!
//! Tasks are split into chunks of at most `batch_size`. Chunks run one after
//! another; the tasks of a chunk run concurrently. The first task in a chunk
//! that exits non-zero stops its still-running siblings and no later chunk
//! is started.

mod task;


pub use task::{BatchResult, ExecutionResult, Task, TaskState};

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::error::{Result, SliceError};
use crate::subprocess::{shutdown_channel, OutputSink, ProcessRunner};

const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Number of chunks `total` tasks are split into.
pub fn chunk_count(total: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    total.div_ceil(batch_size)
}

pub struct BatchDispatcher {
    runner: Arc<dyn ProcessRunner>,
    dry_run: bool,
    log_dir: PathBuf,
    progress_interval: Duration,
}

impl BatchDispatcher {
    pub fn new(runner: Arc<dyn ProcessRunner>, dry_run: bool) -> Self {
        Self {
            runner,
            dry_run,
            log_dir: std::env::temp_dir(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Directory the per-task log files are created in.
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Runs `tasks` in chunks of `batch_size`, stopping at the first failing chunk.
    ///
    /// A failing batch is still `Ok`; callers that treat it as an error use
    /// [`BatchResult::ensure_success`].
    pub async fn run_batch(
        &self,
        job: &str,
        tasks: Vec<Task>,
        batch_size: usize,
    ) -> Result<BatchResult> {
        if batch_size == 0 {
            return Err(SliceError::InvalidBatchSize);
        }
        ensure_exclusive_sinks(&tasks, batch_size)?;

        let mut result = BatchResult::new(job);

        if self.dry_run {
            for task in &tasks {
                info!("Task: `{}` is implemented by `{}`", task.id, task.command.script);
            }
            info!("Pretending all the jobs succeeded");
            return Ok(result);
        }

        let chunks = chunk_count(tasks.len(), batch_size);
        info!(
            "Breaking up a total of {} commands into {} batches",
            tasks.len(),
            chunks
        );

        for (index, chunk) in tasks.chunks(batch_size).enumerate() {
            info!("Dispatching batch {}/{}", index + 1, chunks);
            result.dispatched_chunks = index + 1;

            let outcome = self.run_chunk(job, chunk).await?;
            let failed = outcome.iter().any(|r| r.state == TaskState::Failed);
            result.absorb(outcome);

            if failed {
                break;
            }
        }

        if result.is_success() {
            info!("{} completed successfully", job);
        } else {
            warn!(
                "{} failed with exit code {} in batch {}/{}",
                job, result.max_exit_code, result.dispatched_chunks, chunks
            );
        }
        Ok(result)
    }

    async fn run_chunk(&self, job: &str, chunk: &[Task]) -> Result<Vec<ExecutionResult>> {
        let start = Instant::now();
        let sinks = chunk
            .iter()
            .map(|task| self.sink_for(task))
            .collect::<Result<Vec<_>>>()?;

        let (trigger, shutdown) = shutdown_channel();
        let mut states = vec![TaskState::Pending; chunk.len()];
        let mut running = FuturesUnordered::new();

        for (index, (task, sink)) in chunk.iter().zip(&sinks).enumerate() {
            let runner = Arc::clone(&self.runner);
            let command = task.command.clone();
            let sink = sink.clone();
            let shutdown = shutdown.clone();

            states[index] = TaskState::Running;
            running.push(async move {
                let started = Instant::now();
                let status = runner.run_to_sink(command, sink, shutdown).await;
                (index, status, started.elapsed())
            });
        }

        let mut ticker = tokio::time::interval(self.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut results = Vec::with_capacity(chunk.len());
        let mut failed = false;

        loop {
            tokio::select! {
                next = running.next() => {
                    let Some((index, status, elapsed)) = next else {
                        break;
                    };
                    let status = match status {
                        Ok(status) => status,
                        Err(err) => {
                            warn!("Could not run task {}: {}", chunk[index].id, err);
                            trigger.fire();
                            while running.next().await.is_some() {}
                            return Err(err.into());
                        }
                    };

                    let state = TaskState::from_exit(status);
                    states[index] = state;

                    if state == TaskState::Failed && !failed {
                        failed = true;
                        warn!("Terminating all {} processes since at least one failed.", job);
                        warn!(
                            "Failure is {} and logfile {}",
                            chunk[index].id,
                            describe_sink(&sinks[index])
                        );
                        trigger.fire();
                    }

                    results.push(ExecutionResult {
                        task_id: chunk[index].id.clone(),
                        exit_code: status.code(),
                        state,
                        elapsed,
                        log: log_path(&sinks[index]),
                    });
                    log_progress(job, start, chunk, &states, &sinks);
                }
                _ = ticker.tick() => log_progress(job, start, chunk, &states, &sinks),
            }
        }

        Ok(results)
    }

    fn sink_for(&self, task: &Task) -> Result<OutputSink> {
        if let Some(sink) = &task.sink {
            return Ok(sink.clone());
        }

        let file = tempfile::Builder::new()
            .prefix(&format!("{}-", task.id))
            .suffix(".log")
            .tempfile_in(&self.log_dir)?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(OutputSink::File(path))
    }
}

/// Log files are private to one task. The terminal can be inherited by at
/// most one task per chunk, since a chunk's tasks run at the same time.
fn ensure_exclusive_sinks(tasks: &[Task], batch_size: usize) -> Result<()> {
    let mut seen = HashSet::new();
    for task in tasks {
        if let Some(OutputSink::File(path)) = &task.sink {
            if !seen.insert(path) {
                return Err(SliceError::Validation(format!(
                    "Task {} shares its log file {} with another task",
                    task.id,
                    path.display()
                )));
            }
        }
    }

    for chunk in tasks.chunks(batch_size) {
        let mut inheriting = chunk
            .iter()
            .filter(|task| task.sink == Some(OutputSink::Inherit));
        if let (Some(first), Some(second)) = (inheriting.next(), inheriting.next()) {
            return Err(SliceError::Validation(format!(
                "Tasks {} and {} would both write to the terminal at the same time",
                first.id, second.id
            )));
        }
    }
    Ok(())
}

fn log_path(sink: &OutputSink) -> Option<PathBuf> {
    match sink {
        OutputSink::File(path) => Some(path.clone()),
        _ => None,
    }
}

fn describe_sink(sink: &OutputSink) -> String {
    match sink {
        OutputSink::File(path) => path.display().to_string(),
        OutputSink::Inherit => "<terminal>".to_string(),
        OutputSink::Null => "<discarded>".to_string(),
    }
}

fn log_progress(
    job: &str,
    start: Instant,
    chunk: &[Task],
    states: &[TaskState],
    sinks: &[OutputSink],
) {
    let completed = states.iter().filter(|s| s.is_finished()).count();
    let slow = states
        .iter()
        .position(|s| !s.is_finished())
        .map(|index| {
            format!(
                ", task {} still working, logfile {}",
                chunk[index].id,
                describe_sink(&sinks[index])
            )
        })
        .unwrap_or_default();

    info!(
        "[t={:.2}, {}] Completed {}/{}{}",
        start.elapsed().as_secs_f64(),
        job,
        completed,
        states.len(),
        slow
    );
}
