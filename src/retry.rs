//! Bounded, fixed-delay retries for idempotent operations.
//!
//! Used for steps that race an eventually-consistent control plane, such as
//! applying resources whose admission webhook is still starting. Every
//! failure is treated as retryable; there is no backoff growth and no jitter.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::SliceError;
use crate::subprocess::{CommandExecutor, ProcessCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Progress of one retried operation. Handed to every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// 1-based.
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            max_attempts: policy.max_attempts.max(1),
            delay: policy.delay,
        }
    }

    pub fn is_last(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Calls `operation` until it succeeds or `policy.max_attempts` is used up,
/// sleeping `policy.delay` between attempts. The last result is returned
/// either way.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    description: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(RetryState) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut state = RetryState::new(policy);

    loop {
        match operation(state).await {
            Ok(value) => {
                if state.attempt > 1 {
                    debug!("{} succeeded on attempt {}", description, state.attempt);
                }
                return Ok(value);
            }
            Err(err) if state.is_last() => {
                warn!(
                    "{} failed after {} attempts: {}",
                    description, state.attempt, err
                );
                return Err(err);
            }
            Err(err) => {
                warn!(
                    "{} failed on attempt {}/{}: {}. Retrying after {:?}",
                    description, state.attempt, state.max_attempts, err, state.delay
                );
                sleep(state.delay).await;
                state.attempt += 1;
            }
        }
    }
}

/// Retries a command until it exits zero. Exhaustion surfaces as
/// [`SliceError::ExecutionFailure`] carrying the last exit code.
pub async fn retry_command(
    executor: &CommandExecutor,
    command: &ProcessCommand,
    task: &str,
    policy: &RetryPolicy,
) -> Result<(), SliceError> {
    retry(policy, task, |_| run_once(executor, command, task)).await
}

async fn run_once(
    executor: &CommandExecutor,
    command: &ProcessCommand,
    task: &str,
) -> Result<(), SliceError> {
    let exit_code = executor.execute(command, task).await?;
    if exit_code == 0 {
        Ok(())
    } else {
        Err(SliceError::ExecutionFailure {
            task: task.to_string(),
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_fifth_attempt() {
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = retry(&policy(5), "apply", |state| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if state.attempt < 5 {
                    Err(format!("webhook not ready ({})", state.attempt))
                } else {
                    Ok(state.attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_returns_last_failure() {
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry(&policy(5), "apply", |state| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("attempt {}", state.attempt)) }
        })
        .await;

        assert_eq!(result, Err("attempt 5".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_only_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), &str> = retry(&policy(3), "apply", |_| async { Err("no") }).await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        let start = tokio::time::Instant::now();
        let _: Result<(), &str> = retry(&policy(3), "apply", |_| async { Ok(()) }).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), &str> = retry(&policy(0), "apply", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("no") }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_command_until_success() {
        let (executor, mut mock) = CommandExecutor::mock();
        mock.expect_command("kubectl apply")
            .returns_exit_code(1)
            .times(4)
            .finish();
        mock.expect_command("kubectl apply").returns_success().finish();

        let command = ProcessCommand::shell("kubectl apply -f kueue.yaml");
        retry_command(&executor, &command, "Applying Kueue Resources", &policy(5))
            .await
            .unwrap();

        assert!(mock.verify_called("kubectl apply", 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_command_exhausted() {
        let (executor, mut mock) = CommandExecutor::mock();
        mock.expect_command("kubectl apply").returns_exit_code(2).finish();

        let command = ProcessCommand::shell("kubectl apply -f kueue.yaml");
        let err = retry_command(&executor, &command, "Applying Kueue Resources", &policy(5))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SliceError::ExecutionFailure { exit_code: 2, .. }
        ));
        assert!(mock.verify_called("kubectl apply", 5));
    }
}
