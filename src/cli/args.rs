//! CLI argument structures

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::workflow::workload::StatusFilter;

/// Provision accelerator clusters and submit workloads to them
#[derive(Parser)]
#[command(name = "slicekit")]
#[command(about = "slicekit - Provision accelerator node pools and run workloads on them", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log the commands that would run without running any of them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, delete, list and describe clusters
    Cluster {
        #[command(subcommand)]
        command: ClusterCommands,
    },
    /// Create, delete and list workloads on a cluster
    Workload {
        #[command(subcommand)]
        command: WorkloadCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Location {
    /// GCP project, defaults to `gcloud config get project`
    #[arg(long)]
    pub project: Option<String>,

    /// GCP zone, defaults to `gcloud config get compute/zone`
    #[arg(long)]
    pub zone: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Cluster name
    #[arg(long)]
    pub cluster: String,

    #[command(flatten)]
    pub location: Location,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct DeviceArgs {
    /// TPU slice type, e.g. v5p-128
    #[arg(long)]
    pub tpu_type: Option<String>,

    /// Any device type, e.g. h100-80gb-8 or n2-standard-32-4
    #[arg(long)]
    pub device_type: Option<String>,
}

impl DeviceArgs {
    pub fn device_type(&self) -> String {
        self.tpu_type
            .clone()
            .or_else(|| self.device_type.clone())
            .unwrap_or_default()
    }
}

#[derive(Subcommand)]
pub enum ClusterCommands {
    /// Create a cluster or resize its slices
    Create {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        device: DeviceArgs,

        /// Number of slices
        #[arg(long, default_value = "1")]
        num_slices: u32,

        /// Provision on-demand capacity
        #[arg(long)]
        on_demand: bool,

        /// Provision from the named reservation
        #[arg(long)]
        reservation: Option<String>,

        /// Provision spot capacity
        #[arg(long)]
        spot: bool,

        #[arg(long, default_value = "AS_NEEDED", value_parser = ["AS_NEEDED", "PERIODIC"])]
        host_maintenance_interval: String,

        /// Machine type of the default CPU node pool
        #[arg(long, default_value = crate::workflow::cluster::DEFAULT_POOL_MACHINE_TYPE)]
        default_pool_cpu_machine_type: String,

        /// Extra arguments for `gcloud beta container clusters create`
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        custom_cluster_arguments: String,

        /// Extra arguments for TPU `gcloud beta container node-pools create`
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        custom_tpu_nodepool_arguments: String,

        /// GKE version, overrides the configured one
        #[arg(long)]
        gke_version: Option<String>,

        /// How many node-pool commands run at once
        #[arg(long)]
        batch_size: Option<usize>,

        /// Delete surplus node pools without asking
        #[arg(long)]
        force: bool,
    },
    /// Delete a cluster
    Delete {
        #[command(flatten)]
        target: Target,
    },
    /// List clusters in a project and region
    List {
        #[command(flatten)]
        location: Location,
    },
    /// Show node pools and TPU usage of a cluster
    Describe {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Priority {
    VeryLow,
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
}

impl Priority {
    /// Name of the matching PriorityClass.
    pub fn class_name(self) -> &'static str {
        match self {
            Priority::VeryLow => "very-low",
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::VeryHigh => "very-high",
        }
    }
}

#[derive(Subcommand)]
pub enum WorkloadCommands {
    /// Submit a workload
    Create {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        device: DeviceArgs,

        /// Workload name
        #[arg(long)]
        workload: String,

        /// Command run in every container
        #[arg(long)]
        command: String,

        /// Number of slices
        #[arg(long, default_value = "1")]
        num_slices: u32,

        /// Image to run, defaults to the configured one
        #[arg(long)]
        docker_image: Option<String>,

        #[arg(long, default_value = "jax-tpu")]
        docker_name: String,

        #[arg(long, value_enum, default_value_t = Priority::Medium)]
        priority: Priority,

        #[arg(long, default_value = "default-scheduler")]
        scheduler: String,

        /// JobSet restarts before the workload is marked failed
        #[arg(long, default_value = "0")]
        max_restarts: u32,

        #[arg(long, default_value = "30")]
        termination_grace_period_seconds: u32,

        /// Container environment variable, KEY=VALUE
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
    },
    /// Delete one workload, or all that pass the filters
    Delete {
        #[command(flatten)]
        target: Target,

        /// Workload to delete; without it every workload passing the filters is deleted
        #[arg(long)]
        workload: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,

        /// Delete without asking
        #[arg(long)]
        force: bool,
    },
    /// List workloads
    List {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        filters: FilterArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    #[arg(long, value_enum, default_value_t = StatusFilter::Everything)]
    pub filter_by_status: StatusFilter,

    /// Regex matched against the job name
    #[arg(long)]
    pub filter_by_job: Option<String>,
}
