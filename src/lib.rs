//! # slicekit
//!
//! Provisions accelerator node pools on GKE and gates workload submission
//! against the capacity a cluster was built with.
//!
//! ## Modules
//!
//! - `subprocess` - Process spawning behind a mockable runner, plus dry-run aware execution
//! - `dispatch` - Chunked, fail-fast parallel execution of command batches
//! - `retry` - Fixed-delay retries for idempotent operations
//! - `nodepool` - Node pool reconciliation with confirmed deletions
//! - `capacity` - Capacity registry and workload admission
//! - `system` - Catalogue of accelerator device types
//! - `gke` - `gcloud`/`kubectl` command lines and Kubernetes manifests
//! - `workflow` - Cluster and workload operations built from the above
//! - `config` - Configuration file, environment overrides and run context
//! - `interaction` - Injectable yes/no confirmation
pub mod capacity;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gke;
pub mod interaction;
pub mod nodepool;
pub mod retry;
pub mod subprocess;
pub mod system;
pub mod workflow;
