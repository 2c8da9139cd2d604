//! Google Kubernetes Engine specifics: command lines, manifests and the
//! choice of capacity a node pool is provisioned from.

pub mod commands;
pub mod manifests;

pub use commands::NodePoolOptions;
pub use manifests::write_manifest;

use tracing::{error, info};

use crate::config::RunContext;
use crate::error::{Result, SliceError};
use crate::nodepool::NodePoolCommands;
use crate::subprocess::{CommandExecutor, ProcessCommand};
use crate::system::SystemCharacteristics;

/// Where the VMs of a node pool come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capacity {
    OnDemand,
    Reservation(String),
    Spot,
}

impl Capacity {
    pub fn args(&self) -> Vec<String> {
        match self {
            Capacity::OnDemand => Vec::new(),
            Capacity::Reservation(name) => vec![
                "--reservation-affinity=specific".to_string(),
                format!("--reservation={name}"),
            ],
            Capacity::Spot => vec!["--spot".to_string()],
        }
    }
}

/// Capacity selection as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CapacityFlags {
    pub on_demand: bool,
    pub reservation: Option<String>,
    pub spot: bool,
}

impl CapacityFlags {
    /// Turns the flags into a [`Capacity`]. A reservation must exist in the
    /// project before it is accepted.
    pub async fn resolve(&self, executor: &CommandExecutor, ctx: &RunContext) -> Result<Capacity> {
        let chosen =
            usize::from(self.on_demand) + usize::from(self.reservation.is_some()) + usize::from(self.spot);

        match chosen {
            0 => {
                let code = executor
                    .execute(&commands::reservation_list(ctx), "Few Reservations Listed")
                    .await?;
                if code != 0 {
                    error!("Unable to list reservations in project {}", ctx.project);
                }
                Err(SliceError::Validation(
                    "No capacity type specified, pass one of --on-demand, --reservation or --spot"
                        .to_string(),
                ))
            }
            1 => {
                if let Some(reservation) = &self.reservation {
                    verify_reservation(executor, ctx, reservation).await?;
                    Ok(Capacity::Reservation(reservation.clone()))
                } else if self.spot {
                    Ok(Capacity::Spot)
                } else {
                    Ok(Capacity::OnDemand)
                }
            }
            _ => Err(SliceError::Validation(
                "Only one of --on-demand, --reservation or --spot may be specified".to_string(),
            )),
        }
    }
}

async fn verify_reservation(
    executor: &CommandExecutor,
    ctx: &RunContext,
    reservation: &str,
) -> Result<()> {
    let command = commands::reservation_describe(ctx, reservation);
    let code = executor.execute(&command, "Describe reservation").await?;
    if code != 0 {
        return Err(SliceError::Validation(format!(
            "Unable to find reservation {reservation} in project {} zone {}",
            ctx.project, ctx.zone
        )));
    }
    info!("Reservation {} found", reservation);
    Ok(())
}

/// Splits user-provided extra `gcloud` arguments the way a shell would.
pub fn parse_custom_args(args: &str) -> Result<Vec<String>> {
    shell_words::split(args)
        .map_err(|e| SliceError::Validation(format!("Cannot parse custom arguments {args:?}: {e}")))
}

/// Node-pool commands for one cluster and device type.
pub struct GkeNodePoolCommands<'a> {
    pub ctx: &'a RunContext,
    pub system: &'a SystemCharacteristics,
    pub options: &'a NodePoolOptions,
}

impl NodePoolCommands for GkeNodePoolCommands<'_> {
    fn create_command(&self, name: &str) -> ProcessCommand {
        commands::node_pool_create(self.ctx, name, self.system, self.options)
    }

    fn delete_command(&self, name: &str) -> ProcessCommand {
        commands::node_pool_delete(self.ctx, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    fn ctx() -> RunContext {
        RunContext {
            cluster: "demo".into(),
            project: "proj".into(),
            zone: "us-central2-b".into(),
            gke_version: "1.28.3-gke.1286000".into(),
            dry_run: false,
            force: false,
            batch_size: 10,
            retry: RetryPolicy::default(),
            log_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn test_capacity_args() {
        assert!(Capacity::OnDemand.args().is_empty());
        assert_eq!(Capacity::Spot.args(), vec!["--spot"]);
        assert_eq!(
            Capacity::Reservation("r1".into()).args(),
            vec!["--reservation-affinity=specific", "--reservation=r1"]
        );
    }

    #[tokio::test]
    async fn test_no_capacity_lists_reservations_and_fails() {
        let (executor, mut mock) = CommandExecutor::mock();
        mock.expect_command("reservations list").returns_success().finish();

        let err = CapacityFlags::default().resolve(&executor, &ctx()).await.unwrap_err();

        assert!(matches!(err, SliceError::Validation(_)));
        assert!(mock.verify_called("reservations list", 1));
    }

    #[tokio::test]
    async fn test_several_capacities_rejected() {
        let (executor, mock) = CommandExecutor::mock();
        let flags = CapacityFlags {
            on_demand: true,
            spot: true,
            ..Default::default()
        };

        let err = flags.resolve(&executor, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("Only one"));
        assert!(mock.get_call_history().is_empty());
    }

    #[tokio::test]
    async fn test_reservation_must_exist() {
        let (executor, mut mock) = CommandExecutor::mock();
        mock.expect_command("reservations describe missing")
            .returns_exit_code(1)
            .finish();
        let flags = CapacityFlags {
            reservation: Some("missing".into()),
            ..Default::default()
        };

        let err = flags.resolve(&executor, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_existing_reservation_accepted() {
        let (executor, mut mock) = CommandExecutor::mock();
        mock.expect_command("reservations describe r1").returns_success().finish();
        let flags = CapacityFlags {
            reservation: Some("r1".into()),
            ..Default::default()
        };

        let capacity = flags.resolve(&executor, &ctx()).await.unwrap();
        assert_eq!(capacity, Capacity::Reservation("r1".into()));
    }

    #[test]
    fn test_parse_custom_args() {
        assert_eq!(
            parse_custom_args("--enable-ip-alias --labels='a=b c'").unwrap(),
            vec!["--enable-ip-alias", "--labels=a=b c"]
        );
        assert!(parse_custom_args("--broken 'quote").is_err());
    }
}
