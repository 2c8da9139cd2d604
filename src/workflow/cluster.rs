use anyhow::{Context, Result};
use tracing::{error, info};

use super::{first_column, run_checked, value_checked, Services};
use crate::capacity::CapacityRegistry;
use crate::config::RunContext;
use crate::gke::{self, commands, manifests, CapacityFlags, GkeNodePoolCommands, NodePoolOptions};
use crate::nodepool::{self, NodePoolReconciler};
use crate::retry::retry_command;
use crate::system;

pub const DEFAULT_POOL_MACHINE_TYPE: &str = "e2-standard-16";

#[derive(Debug, Clone)]
pub struct ClusterCreateRequest {
    pub device_type: String,
    pub num_slices: u32,
    pub capacity: CapacityFlags,
    pub host_maintenance_interval: String,
    pub default_pool_machine_type: String,
    pub custom_cluster_arguments: String,
    pub custom_tpu_nodepool_arguments: String,
}

/// Brings a cluster to `request.num_slices` slices of one device type, with
/// JobSet and Kueue installed and its capacity recorded.
pub async fn create(
    ctx: &RunContext,
    services: &Services,
    request: &ClusterCreateRequest,
) -> Result<()> {
    let system = system::lookup(&request.device_type)?;
    info!("Starting cluster create for cluster {}:", ctx.cluster);

    create_cluster_if_necessary(
        ctx,
        services,
        &request.default_pool_machine_type,
        &request.custom_cluster_arguments,
    )
    .await?;

    info!(
        "Creating {} node pool or pools of {}, underlyingly we assume that means: {:?}",
        request.num_slices, request.device_type, system
    );
    let existing = first_column(
        &value_checked(&services.executor, &commands::node_pool_list(ctx), "Get All Node Pools")
            .await
            .context("Listing all node pools failed")?,
    );
    let options = NodePoolOptions {
        capacity: request
            .capacity
            .resolve(&services.executor, ctx)
            .await
            .context("Parsing capacity arguments failed")?,
        host_maintenance_interval: request.host_maintenance_interval.clone(),
        custom_tpu_args: gke::parse_custom_args(&request.custom_tpu_nodepool_arguments)?,
    };
    let pool_commands = GkeNodePoolCommands {
        ctx,
        system: &system,
        options: &options,
    };
    NodePoolReconciler::new(&services.dispatcher, services.prompter.as_ref(), ctx.batch_size)
        .with_force(ctx.force)
        .reconcile(
            &nodepool::desired_pool_names(&ctx.cluster, request.num_slices),
            &existing,
            &nodepool::managed_prefix(&ctx.cluster),
            &pool_commands,
        )
        .await
        .context("Creating or deleting node pools failed")?;

    run_checked(&services.executor, &commands::set_credentials(ctx), "Set Cluster").await?;

    info!("Enabling the jobset API on our cluster");
    let jobset = run_checked(
        &services.executor,
        &commands::install_jobset(),
        "Set Jobset On Cluster",
    )
    .await;
    if let Err(err) = jobset {
        error!(
            "Installing JobSet failed. This usually means Kubernetes permissions are missing, \
             check whether the error mentions `requires one of [\"container.*\"] permission(s)`."
        );
        return Err(err.into());
    }

    info!("Enabling Kueue on the cluster");
    run_checked(&services.executor, &commands::install_kueue(), "Set Kueue On Cluster").await?;

    // The Kueue webhook may not be serving yet right after install
    info!("Enable Kueue CRDs");
    let kueue = manifests::kueue_resources(request.num_slices, &system)?;
    let path = manifests::write_manifest(&ctx.log_dir, "kueue-resources", &kueue)?;
    retry_command(
        &services.executor,
        &commands::apply_manifest(&path),
        "Applying Kueue CRDs",
        &ctx.retry,
    )
    .await?;

    info!("Creating ConfigMap for cluster");
    let vms = u64::from(request.num_slices) * u64::from(system.vms_per_slice);
    services
        .registry
        .put(&system.device_type, vms)
        .await
        .context("Recording cluster capacity failed")?;

    info!("GKE commands done! Resources are created.");
    info!(
        "See your GKE Cluster here: https://console.cloud.google.com/kubernetes/clusters/details/{}/{}/details?project={}",
        ctx.region(),
        ctx.cluster,
        ctx.project
    );
    Ok(())
}

async fn create_cluster_if_necessary(
    ctx: &RunContext,
    services: &Services,
    machine_type: &str,
    custom_arguments: &str,
) -> Result<()> {
    let clusters = first_column(
        &value_checked(&services.executor, &commands::cluster_list(ctx), "Find if Cluster Exists")
            .await
            .context("Listing all clusters failed")?,
    );
    if clusters.contains(&ctx.cluster) {
        info!("Skipping cluster creation since it already exists");
        return Ok(());
    }

    let custom_args = gke::parse_custom_args(custom_arguments)?;
    run_checked(
        &services.executor,
        &commands::cluster_create(ctx, machine_type, &custom_args),
        "GKE Cluster Create",
    )
    .await?;
    Ok(())
}

pub async fn delete(ctx: &RunContext, services: &Services) -> Result<()> {
    info!("Starting cluster delete for cluster: {}", ctx.cluster);
    run_checked(&services.executor, &commands::cluster_delete(ctx), "Cluster Delete").await?;
    info!("GKE commands done! Cluster {} deleted.", ctx.cluster);
    Ok(())
}

pub async fn list(ctx: &RunContext, services: &Services) -> Result<()> {
    info!("For project {} and zone {}:", ctx.project, ctx.zone);
    run_checked(&services.executor, &commands::cluster_list(ctx), "Cluster List").await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterSummary {
    pub tpu_vms: usize,
    pub running_pods: usize,
}

pub async fn describe(ctx: &RunContext, services: &Services) -> Result<ClusterSummary> {
    info!("Starting nodepool list for cluster: {}", ctx.cluster);
    run_checked(&services.executor, &commands::set_credentials(ctx), "Set Cluster").await?;
    run_checked(&services.executor, &commands::node_pool_list(ctx), "Cluster nodepool list").await?;

    let nodes = value_checked(&services.executor, &commands::list_tpu_nodes(), "Count TPU Nodes").await?;
    let pods = value_checked(&services.executor, &commands::list_pod_phases(), "Count TPU Pods").await?;

    let summary = ClusterSummary {
        tpu_vms: nodes.lines().filter(|line| !line.trim().is_empty()).count(),
        running_pods: pods
            .lines()
            .filter(|line| line.to_ascii_lowercase().contains("running"))
            .count(),
    };
    println!(
        "The cluster contains {} TPUVMs of which {} are in use.",
        summary.tpu_vms, summary.running_pods
    );
    Ok(summary)
}
