//! `gcloud` and `kubectl` command lines.

use std::path::Path;

use crate::config::RunContext;
use crate::subprocess::{ProcessCommand, ProcessCommandBuilder};
use crate::system::{Accelerator, SystemCharacteristics};

use super::Capacity;

pub const JOBSET_MANIFEST_URL: &str =
    "https://github.com/kubernetes-sigs/jobset/releases/download/v0.3.1/manifests.yaml";
pub const KUEUE_MANIFEST_URL: &str =
    "https://github.com/kubernetes-sigs/kueue/releases/download/v0.4.1/manifests.yaml";

/// Columns of `kubectl get workloads` shown by `workload list`.
pub const WORKLOAD_LIST_COLUMNS: &[(&str, &str)] = &[
    ("Jobset Name", ".metadata.ownerReferences[0].name"),
    ("Created Time", ".metadata.creationTimestamp"),
    ("Priority", ".spec.priorityClassName"),
    ("TPU VMs Needed", ".spec.podSets[0].count"),
    ("TPU VMs Running/Ran", ".status.admission.podSetAssignments[-1].count"),
    ("TPU VMs Done", ".status.reclaimablePods[0].count"),
    ("Status", ".status.conditions[-1].type"),
    ("Status Message", ".status.conditions[-1].message"),
    ("Status Time", ".status.conditions[-1].lastTransitionTime"),
];

fn gcloud() -> ProcessCommandBuilder {
    ProcessCommandBuilder::new("gcloud")
}

fn kubectl() -> ProcessCommandBuilder {
    ProcessCommandBuilder::new("kubectl")
}

fn custom_columns(columns: &[(&str, &str)]) -> String {
    let spec = columns
        .iter()
        .map(|(name, path)| format!("{name}:{path}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("-o=custom-columns={spec}")
}

pub fn gcloud_config_get(key: &str) -> ProcessCommand {
    gcloud().args(["config", "get", key]).build()
}

pub fn cluster_create(ctx: &RunContext, machine_type: &str, custom_args: &[String]) -> ProcessCommand {
    gcloud()
        .args(["beta", "container", "clusters", "create", ctx.cluster.as_str()])
        .args(["--release-channel", "rapid", "--enable-autoscaling"])
        .args(["--total-min-nodes", "1", "--total-max-nodes", "1000", "--num-nodes", "6"])
        .flag("node-locations", &ctx.zone)
        .flag("project", &ctx.project)
        .flag("region", ctx.region())
        .flag("cluster-version", &ctx.gke_version)
        .flag("location-policy", "BALANCED")
        .flag("machine-type", machine_type)
        .flag("scopes", "storage-full,gke-default")
        .args(custom_args)
        .build()
}

pub fn cluster_delete(ctx: &RunContext) -> ProcessCommand {
    gcloud()
        .args(["beta", "container", "clusters", "delete", ctx.cluster.as_str()])
        .flag("project", &ctx.project)
        .flag("region", ctx.region())
        .arg("--quiet")
        .build()
}

pub fn cluster_list(ctx: &RunContext) -> ProcessCommand {
    gcloud()
        .args(["container", "clusters", "list"])
        .flag("project", &ctx.project)
        .flag("region", ctx.region())
        .build()
}

pub fn node_pool_list(ctx: &RunContext) -> ProcessCommand {
    gcloud()
        .args(["beta", "container", "node-pools", "list", "--cluster", ctx.cluster.as_str()])
        .flag("project", &ctx.project)
        .flag("region", ctx.region())
        .build()
}

/// Options of a node-pool create command that do not vary per pool.
#[derive(Debug, Clone)]
pub struct NodePoolOptions {
    pub capacity: Capacity,
    pub host_maintenance_interval: String,
    pub custom_tpu_args: Vec<String>,
}

pub fn node_pool_create(
    ctx: &RunContext,
    name: &str,
    system: &SystemCharacteristics,
    options: &NodePoolOptions,
) -> ProcessCommand {
    let mut builder = gcloud()
        .args(["beta", "container", "node-pools", "create", name])
        .flag("node-version", &ctx.gke_version)
        .flag("cluster", &ctx.cluster)
        .flag("project", &ctx.project)
        .flag("node-locations", &ctx.zone)
        .flag("region", ctx.region())
        .flag("num-nodes", system.vms_per_slice)
        .flag("machine-type", &system.machine_type)
        .flag("host-maintenance-interval", &options.host_maintenance_interval)
        .args(options.capacity.args())
        .flag("scopes", "storage-full,gke-default")
        .args(["--enable-gvnic", "--max-pods-per-node", "15"]);

    match &system.accelerator {
        Accelerator::Tpu { topology, .. } => {
            builder = builder
                .flag("placement-type", "COMPACT")
                .flag("tpu-topology", topology)
                .args(&options.custom_tpu_args);
        }
        Accelerator::Gpu { gke_accelerator } => {
            builder = builder
                .flag("placement-type", "COMPACT")
                .arg("--accelerator")
                .arg(format!("type={},count={}", gke_accelerator, system.chips_per_vm));
        }
        Accelerator::Cpu => {}
    }

    builder.build()
}

pub fn node_pool_delete(ctx: &RunContext, name: &str) -> ProcessCommand {
    gcloud()
        .args(["beta", "container", "node-pools", "delete", name])
        .flag("cluster", &ctx.cluster)
        .flag("zone", ctx.region())
        .flag("project", &ctx.project)
        .arg("--quiet")
        .build()
}

pub fn reservation_describe(ctx: &RunContext, reservation: &str) -> ProcessCommand {
    gcloud()
        .args(["beta", "compute", "reservations", "describe", reservation])
        .flag("project", &ctx.project)
        .flag("zone", &ctx.zone)
        .build()
}

pub fn reservation_list(ctx: &RunContext) -> ProcessCommand {
    gcloud()
        .args(["beta", "compute", "reservations", "list"])
        .flag("project", &ctx.project)
        .build()
}

/// Points kubectl at the cluster and its `default` namespace.
pub fn set_credentials(ctx: &RunContext) -> ProcessCommand {
    gcloud()
        .args(["container", "clusters", "get-credentials", ctx.cluster.as_str()])
        .flag("region", ctx.region())
        .flag("project", &ctx.project)
        .and_then("kubectl")
        .args(["config", "view"])
        .and_then("kubectl")
        .args(["config", "set-context", "--current", "--namespace=default"])
        .build()
}

pub fn install_jobset() -> ProcessCommand {
    kubectl()
        .args(["apply", "--server-side", "-f", JOBSET_MANIFEST_URL])
        .build()
}

pub fn install_kueue() -> ProcessCommand {
    kubectl().args(["apply", "-f", KUEUE_MANIFEST_URL]).build()
}

pub fn apply_manifest(path: &Path) -> ProcessCommand {
    kubectl()
        .args(["apply", "-f"])
        .arg(path.to_string_lossy())
        .build()
}

pub fn delete_manifest(path: &Path) -> ProcessCommand {
    kubectl()
        .args(["delete", "-f"])
        .arg(path.to_string_lossy())
        .build()
}

pub fn get_configmap(name: &str) -> ProcessCommand {
    kubectl()
        .args(["get", "configmap", name])
        .arg(custom_columns(&[("ConfigData", "data")]))
        .flag("no-headers", true)
        .build()
}

pub fn list_tpu_nodes() -> ProcessCommand {
    kubectl()
        .args(["get", "node"])
        .flag("no-headers", true)
        .flag("selector", "cloud.google.com/gke-tpu-accelerator")
        .build()
}

pub fn list_pod_phases() -> ProcessCommand {
    kubectl()
        .args(["get", "pod"])
        .arg(custom_columns(&[("Status", ".status.phase")]))
        .build()
}

pub fn list_workloads() -> ProcessCommand {
    kubectl()
        .args(["get", "workloads"])
        .arg(custom_columns(WORKLOAD_LIST_COLUMNS))
        .build()
}

/// Names of the JobSets owning each workload, one per line after the header.
pub fn list_workload_owners() -> ProcessCommand {
    kubectl()
        .args(["get", "workloads"])
        .arg(custom_columns(&[("Jobset", ".metadata.ownerReferences[0].name")]))
        .build()
}
