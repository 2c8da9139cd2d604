//! Defaults read from `config.toml` and the per-invocation [`RunContext`].

pub mod loader;


pub use loader::ConfigLoader;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, SliceError};
use crate::retry::RetryPolicy;

pub const DEFAULT_GKE_VERSION: &str = "1.28.3-gke.1286000";
pub const DEFAULT_DOCKER_IMAGE: &str = "python:3.10";
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Directory holding `config.toml`.
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("dev", "slicekit", "slicekit").map(|dirs| dirs.config_dir().to_path_buf())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceConfig {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub gke_version: String,
    pub project: Option<String>,
    pub zone: Option<String>,
    pub default_docker_image: String,
    /// Where per-task logs of batched commands go. Defaults to the temp dir.
    pub log_dir: Option<PathBuf>,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            gke_version: DEFAULT_GKE_VERSION.to_string(),
            project: None,
            zone: None,
            default_docker_image: DEFAULT_DOCKER_IMAGE.to_string(),
            log_dir: None,
        }
    }
}

impl SliceConfig {
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    /// Applies `SLICEKIT_*` overrides looked up through `var`.
    pub fn merge_vars<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(batch_size) = var("SLICEKIT_BATCH_SIZE") {
            self.batch_size = batch_size.parse().map_err(|_| {
                SliceError::Config(format!(
                    "SLICEKIT_BATCH_SIZE must be a positive integer, got {batch_size:?}"
                ))
            })?;
        }
        if let Some(project) = var("SLICEKIT_PROJECT") {
            self.project = Some(project);
        }
        if let Some(zone) = var("SLICEKIT_ZONE") {
            self.zone = Some(zone);
        }
        if let Some(version) = var("SLICEKIT_GKE_VERSION") {
            self.gke_version = version;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SliceError::Config(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SliceError::Config(
                "retry.max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Everything a workflow needs to know about one invocation. Built once
/// from the command line and [`SliceConfig`], never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub cluster: String,
    pub project: String,
    pub zone: String,
    pub gke_version: String,
    pub dry_run: bool,
    pub force: bool,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub log_dir: PathBuf,
}

impl RunContext {
    /// `us-central2-b` becomes `us-central2`.
    pub fn region(&self) -> String {
        zone_to_region(&self.zone)
    }
}

pub fn zone_to_region(zone: &str) -> String {
    let mut terms = zone.split('-');
    match (terms.next(), terms.next()) {
        (Some(area), Some(location)) => format!("{area}-{location}"),
        _ => zone.to_string(),
    }
}
