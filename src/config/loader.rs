use std::path::{Path, PathBuf};
use tokio::fs;

use super::{config_dir, SliceConfig};
use crate::error::{Result, SliceError};

pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader for `config.toml` in the per-user config directory.
    pub fn new() -> Self {
        Self {
            path: config_dir().map(|dir| dir.join("config.toml")),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reads the file if present, applies environment overrides and
    /// validates the result. A missing file yields the defaults.
    pub async fn load(&self) -> Result<SliceConfig> {
        let mut config = match &self.path {
            Some(path) if path.exists() => Self::read(path).await?,
            Some(path) => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                SliceConfig::default()
            }
            None => SliceConfig::default(),
        };

        config.merge_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    async fn read(path: &Path) -> Result<SliceConfig> {
        tracing::debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path).await?;
        toml::from_str(&content)
            .map_err(|e| SliceError::Config(format!("{}: {}", path.display(), e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
