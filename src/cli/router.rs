//! Command routing and execution
//!
//! Turns parsed arguments plus [`SliceConfig`] into a [`RunContext`] and
//! hands it to the matching workflow.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::cli::args::{ClusterCommands, Commands, FilterArgs, Location, Target, WorkloadCommands};
use crate::config::{RunContext, SliceConfig};
use crate::gke::manifests::WorkloadSpec;
use crate::gke::CapacityFlags;
use crate::interaction::ConsolePrompter;
use crate::subprocess::{CommandExecutor, ProcessRunner, TokioProcessRunner};
use crate::workflow::cluster::ClusterCreateRequest;
use crate::workflow::workload::{WorkloadCreateRequest, WorkloadFilter};
use crate::workflow::{self, cluster, workload, Services};

/// Per-command settings that override [`SliceConfig`].
#[derive(Default)]
struct Overrides {
    force: bool,
    batch_size: Option<usize>,
    gke_version: Option<String>,
}

struct Router {
    config: SliceConfig,
    dry_run: bool,
    runner: Arc<dyn ProcessRunner>,
}

impl Router {
    async fn context(&self, cluster: &str, location: &Location, overrides: Overrides) -> Result<RunContext> {
        let executor = CommandExecutor::new(Arc::clone(&self.runner), self.dry_run);
        let (project, zone) = workflow::resolve_location(
            &executor,
            location.project.clone().or_else(|| self.config.project.clone()),
            location.zone.clone().or_else(|| self.config.zone.clone()),
        )
        .await?;

        let batch_size = overrides.batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            bail!(crate::error::SliceError::InvalidBatchSize);
        }

        Ok(RunContext {
            cluster: cluster.to_string(),
            project,
            zone,
            gke_version: overrides
                .gke_version
                .unwrap_or_else(|| self.config.gke_version.clone()),
            dry_run: self.dry_run,
            force: overrides.force,
            batch_size,
            retry: self.config.retry,
            log_dir: self.config.log_dir(),
        })
    }

    async fn target_context(&self, target: &Target, overrides: Overrides) -> Result<RunContext> {
        self.context(&target.cluster, &target.location, overrides).await
    }

    fn services(&self, ctx: &RunContext) -> Services {
        Services::new(ctx, Arc::clone(&self.runner), Arc::new(ConsolePrompter::new()))
    }

    async fn cluster(&self, command: ClusterCommands) -> Result<()> {
        match command {
            ClusterCommands::Create {
                target,
                device,
                num_slices,
                on_demand,
                reservation,
                spot,
                host_maintenance_interval,
                default_pool_cpu_machine_type,
                custom_cluster_arguments,
                custom_tpu_nodepool_arguments,
                gke_version,
                batch_size,
                force,
            } => {
                let overrides = Overrides {
                    force,
                    batch_size,
                    gke_version,
                };
                let ctx = self.target_context(&target, overrides).await?;
                let request = ClusterCreateRequest {
                    device_type: device.device_type(),
                    num_slices,
                    capacity: CapacityFlags {
                        on_demand,
                        reservation,
                        spot,
                    },
                    host_maintenance_interval,
                    default_pool_machine_type: default_pool_cpu_machine_type,
                    custom_cluster_arguments,
                    custom_tpu_nodepool_arguments,
                };
                cluster::create(&ctx, &self.services(&ctx), &request).await
            }
            ClusterCommands::Delete { target } => {
                let ctx = self.target_context(&target, Overrides::default()).await?;
                cluster::delete(&ctx, &self.services(&ctx)).await
            }
            ClusterCommands::List { location } => {
                let ctx = self.context("", &location, Overrides::default()).await?;
                cluster::list(&ctx, &self.services(&ctx)).await
            }
            ClusterCommands::Describe { target } => {
                let ctx = self.target_context(&target, Overrides::default()).await?;
                cluster::describe(&ctx, &self.services(&ctx)).await.map(|_| ())
            }
        }
    }

    async fn workload(&self, command: WorkloadCommands) -> Result<()> {
        match command {
            WorkloadCommands::Create {
                target,
                device,
                workload: name,
                command,
                num_slices,
                docker_image,
                docker_name,
                priority,
                scheduler,
                max_restarts,
                termination_grace_period_seconds,
                env,
            } => {
                let ctx = self.target_context(&target, Overrides::default()).await?;
                let request = WorkloadCreateRequest {
                    device_type: device.device_type(),
                    spec: WorkloadSpec {
                        name,
                        num_slices,
                        command,
                        docker_image: docker_image
                            .unwrap_or_else(|| self.config.default_docker_image.clone()),
                        docker_name,
                        priority: priority.class_name().to_string(),
                        scheduler,
                        max_restarts,
                        termination_grace_period_seconds,
                        env: parse_env(&env)?,
                    },
                };
                workload::create(&ctx, &self.services(&ctx), &request).await
            }
            WorkloadCommands::Delete {
                target,
                workload: name,
                filters,
                force,
            } => {
                let overrides = Overrides {
                    force,
                    ..Default::default()
                };
                let ctx = self.target_context(&target, overrides).await?;
                workload::delete(&ctx, &self.services(&ctx), name.as_deref(), &filter(&filters)?)
                    .await
                    .map(|_| ())
            }
            WorkloadCommands::List { target, filters } => {
                let ctx = self.target_context(&target, Overrides::default()).await?;
                workload::list(&ctx, &self.services(&ctx), &filter(&filters)?)
                    .await
                    .map(|_| ())
            }
        }
    }
}

fn filter(args: &FilterArgs) -> Result<WorkloadFilter> {
    Ok(WorkloadFilter::new(
        args.filter_by_status,
        args.filter_by_job.as_deref(),
    )?)
}

/// Splits `KEY=VALUE` pairs at the first `=`.
fn parse_env(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("Environment variable {pair:?} is not of the form KEY=VALUE"),
        })
        .collect()
}

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(command: Commands, config: SliceConfig, dry_run: bool) -> Result<()> {
    let router = Router {
        config,
        dry_run,
        runner: Arc::new(TokioProcessRunner),
    };

    match command {
        Commands::Cluster { command } => router.cluster(command).await,
        Commands::Workload { command } => router.workload(command).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        let env = parse_env(&["A=1".into(), "B=x=y".into(), "C=".into()]).unwrap();
        assert_eq!(
            env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x=y".to_string()),
                ("C".to_string(), String::new()),
            ]
        );
        assert!(parse_env(&["novalue".into()]).is_err());
        assert!(parse_env(&["=1".into()]).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_context_uses_config_location() {
        let config = SliceConfig {
            project: Some("cfg-project".into()),
            zone: Some("europe-west4-a".into()),
            ..Default::default()
        };
        let router = Router {
            config,
            dry_run: true,
            runner: Arc::new(TokioProcessRunner),
        };
        let location = Location {
            project: None,
            zone: None,
        };

        let ctx = router
            .context("demo", &location, Overrides::default())
            .await
            .unwrap();

        assert_eq!(ctx.project, "cfg-project");
        assert_eq!(ctx.region(), "europe-west4");
        assert!(ctx.dry_run);
        assert_eq!(ctx.batch_size, 10);
    }

    #[tokio::test]
    async fn test_zero_batch_size_override_rejected() {
        let router = Router {
            config: SliceConfig::default(),
            dry_run: true,
            runner: Arc::new(TokioProcessRunner),
        };
        let location = Location {
            project: Some("p".into()),
            zone: Some("us-central2-b".into()),
        };
        let overrides = Overrides {
            batch_size: Some(0),
            ..Default::default()
        };

        assert!(router.context("demo", &location, overrides).await.is_err());
    }
}
