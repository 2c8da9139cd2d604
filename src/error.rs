use thiserror::Error;

use crate::subprocess::ProcessError;

#[derive(Error, Debug)]
pub enum SliceError {
    #[error("Task {task} failed with exit code {exit_code}")]
    ExecutionFailure { task: String, exit_code: i32 },

    #[error("{job} failed with exit code {max_exit_code} after dispatching {dispatched_chunks} batch(es)")]
    AggregateFailure {
        job: String,
        max_exit_code: i32,
        dispatched_chunks: usize,
    },

    #[error(
        "{device_type} requires {required} VMs but the cluster only has capacity for {available}"
    )]
    CapacityExceeded {
        device_type: String,
        required: u64,
        available: u64,
    },

    #[error("Cluster has no capacity for {device_type}, it only contains {available:?}")]
    DeviceTypeUnavailable {
        device_type: String,
        available: Vec<String>,
    },

    #[error("Unknown device type {0}")]
    UnknownDeviceType(String),

    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SliceError {
    /// Exit code the binary terminates with when this error reaches `main`.
    pub fn exit_code(&self) -> i32 {
        match self {
            SliceError::ExecutionFailure { exit_code, .. } => *exit_code,
            SliceError::AggregateFailure { max_exit_code, .. } => *max_exit_code,
            SliceError::Process(err) => err.exit_code(),
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, SliceError>;
