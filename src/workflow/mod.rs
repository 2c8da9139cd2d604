//! End-to-end cluster and workload operations.
//!
//! Each operation receives an immutable [`RunContext`] and the [`Services`]
//! it may touch, and fails with an `anyhow` error whose root cause is a
//! [`SliceError`] whenever an external command or a check failed.

pub mod cluster;
pub mod workload;

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::capacity::{CapacityRegistry, ConfigMapRegistry};
use crate::config::RunContext;
use crate::dispatch::BatchDispatcher;
use crate::error::SliceError;
use crate::gke::commands;
use crate::interaction::UserPrompter;
use crate::subprocess::{CommandExecutor, ProcessCommand, ProcessRunner};

/// Collaborators shared by every workflow step.
pub struct Services {
    pub executor: CommandExecutor,
    pub dispatcher: BatchDispatcher,
    pub prompter: Arc<dyn UserPrompter>,
    pub registry: Arc<dyn CapacityRegistry>,
}

impl Services {
    /// Services backed by `runner`, with the capacity record kept in the
    /// cluster's ConfigMap.
    pub fn new(
        ctx: &RunContext,
        runner: Arc<dyn ProcessRunner>,
        prompter: Arc<dyn UserPrompter>,
    ) -> Self {
        let executor = CommandExecutor::new(Arc::clone(&runner), ctx.dry_run);
        let dispatcher = BatchDispatcher::new(runner, ctx.dry_run).with_log_dir(&ctx.log_dir);
        let registry = Arc::new(ConfigMapRegistry::new(
            executor.clone(),
            &ctx.cluster,
            &ctx.log_dir,
        ));

        Self {
            executor,
            dispatcher,
            prompter,
            registry,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn CapacityRegistry>) -> Self {
        self.registry = registry;
        self
    }
}

/// Runs `command` and turns a nonzero exit into [`SliceError::ExecutionFailure`].
pub(crate) async fn run_checked(
    executor: &CommandExecutor,
    command: &ProcessCommand,
    task: &str,
) -> std::result::Result<(), SliceError> {
    let exit_code = executor.execute(command, task).await?;
    if exit_code != 0 {
        return Err(SliceError::ExecutionFailure {
            task: task.to_string(),
            exit_code,
        });
    }
    Ok(())
}

/// Like [`run_checked`] but hands back the command's stdout.
pub(crate) async fn value_checked(
    executor: &CommandExecutor,
    command: &ProcessCommand,
    task: &str,
) -> std::result::Result<String, SliceError> {
    let (exit_code, stdout) = executor.execute_for_value(command, task, "").await?;
    if exit_code != 0 {
        return Err(SliceError::ExecutionFailure {
            task: task.to_string(),
            exit_code,
        });
    }
    Ok(stdout)
}

/// First whitespace-separated word of every non-empty line.
pub(crate) fn first_column(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Fills in project and zone from `gcloud config` when not given.
pub async fn resolve_location(
    executor: &CommandExecutor,
    project: Option<String>,
    zone: Option<String>,
) -> Result<(String, String)> {
    let project = match project {
        Some(project) => project,
        None => gcloud_config_value(executor, "project", "dry-run-project")
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "You must specify the project with --project or set it with \
                     'gcloud config set project <project>'"
                )
            })?,
    };

    let zone = match zone {
        Some(zone) => zone,
        None => match gcloud_config_value(executor, "compute/zone", "us-central2-b").await? {
            Some(zone) => zone,
            None => bail!(
                "You must specify the zone with --zone or set it with \
                 'gcloud config set compute/zone <zone>'"
            ),
        },
    };

    Ok((project, zone))
}

/// The value is the last line `gcloud config get` prints.
async fn gcloud_config_value(
    executor: &CommandExecutor,
    key: &str,
    dry_run_placeholder: &str,
) -> Result<Option<String>> {
    let command = commands::gcloud_config_get(key);
    let (exit_code, stdout) = executor
        .execute_for_value(&command, &format!("Get {key}"), dry_run_placeholder)
        .await?;
    if exit_code != 0 {
        return Ok(None);
    }
    Ok(stdout
        .trim()
        .lines()
        .last()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string))
}

#[cfg(test)]
pub(crate) fn test_context(log_dir: &std::path::Path) -> RunContext {
    RunContext {
        cluster: "demo".into(),
        project: "proj".into(),
        zone: "us-central2-b".into(),
        gke_version: crate::config::DEFAULT_GKE_VERSION.into(),
        dry_run: false,
        force: false,
        batch_size: 10,
        retry: crate::retry::RetryPolicy {
            max_attempts: 2,
            delay: std::time::Duration::from_millis(10),
        },
        log_dir: log_dir.to_path_buf(),
    }
}
