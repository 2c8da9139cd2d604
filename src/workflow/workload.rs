use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use super::{first_column, run_checked, value_checked, Services};
use crate::capacity::AdmissionController;
use crate::config::RunContext;
use crate::error::SliceError;
use crate::gke::{commands, manifests, manifests::WorkloadSpec};
use crate::interaction;
use crate::system;

pub const MAX_WORKLOAD_NAME_LEN: usize = 40;

static WORKLOAD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").expect("Invalid regex pattern"));

/// Workload names become JobSet and pod names, so they must be short DNS labels.
pub fn validate_workload_name(name: &str) -> std::result::Result<(), SliceError> {
    if name.len() > MAX_WORKLOAD_NAME_LEN || !WORKLOAD_NAME.is_match(name) {
        return Err(SliceError::Validation(format!(
            "Workload name {name:?} must match [a-z]([-a-z0-9]*[a-z0-9])? and be at most \
             {MAX_WORKLOAD_NAME_LEN} characters long"
        )));
    }
    Ok(())
}

/// Status groups `workload list` can narrow down to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusFilter {
    #[default]
    Everything,
    Running,
    Queued,
    Finished,
    Failed,
    Successful,
}

// Whitespace-separated columns of the workload listing.
const JOB_COLUMN: usize = 0;
const RUNNING_VMS_COLUMN: usize = 4;
const STATUS_COLUMN: usize = 6;
const STATUS_VERBOSE_COLUMN: usize = 8;

/// Line filter over `kubectl get workloads` output. The header always passes.
#[derive(Debug, Clone, Default)]
pub struct WorkloadFilter {
    status: StatusFilter,
    job: Option<Regex>,
}

impl WorkloadFilter {
    pub fn new(status: StatusFilter, job: Option<&str>) -> std::result::Result<Self, SliceError> {
        let job = job
            .map(Regex::new)
            .transpose()
            .map_err(|e| SliceError::Validation(format!("Invalid job filter: {e}")))?;
        Ok(Self { status, job })
    }

    pub fn apply(&self, listing: &str) -> String {
        listing
            .lines()
            .enumerate()
            .filter(|(i, line)| *i == 0 || self.matches(line))
            .map(|(_, line)| format!("{line}\n"))
            .collect()
    }

    fn matches(&self, line: &str) -> bool {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        if let Some(job) = &self.job {
            if !job.is_match(field(JOB_COLUMN)) {
                return false;
            }
        }

        let status = field(STATUS_COLUMN);
        let admitted = status.contains("Admitted") || status.contains("Evicted");
        let running_vms = field(RUNNING_VMS_COLUMN);
        let running = running_vms.parse::<u64>().ok();

        match self.status {
            StatusFilter::Everything => true,
            StatusFilter::Running => admitted && running.is_some_and(|vms| vms > 0),
            StatusFilter::Queued => {
                admitted && (running_vms.contains("<none>") || running == Some(0))
            }
            StatusFilter::Finished => status == "Finished",
            StatusFilter::Failed => {
                status == "Finished" && field(STATUS_VERBOSE_COLUMN).contains("failed")
            }
            StatusFilter::Successful => {
                status == "Finished" && field(STATUS_VERBOSE_COLUMN).contains("finished")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkloadCreateRequest {
    pub device_type: String,
    pub spec: WorkloadSpec,
}

/// Submits a JobSet after checking the name is free and the cluster has room.
pub async fn create(
    ctx: &RunContext,
    services: &Services,
    request: &WorkloadCreateRequest,
) -> Result<()> {
    let spec = &request.spec;
    validate_workload_name(&spec.name)?;

    run_checked(&services.executor, &commands::set_credentials(ctx), "Set Cluster").await?;

    if workload_exists(services, &spec.name).await? {
        bail!(SliceError::Validation(format!(
            "{} already exists, will not create this workload. Please pick a new workload name",
            spec.name
        )));
    }

    info!("Starting workload create");
    let system = system::lookup(&request.device_type)?;

    AdmissionController::new(services.registry.clone())
        .check(&system.device_type, spec.num_slices, system.vms_per_slice)
        .await
        .into_result()
        .with_context(|| format!("{} cannot be scheduled", spec.name))?;

    let yaml = manifests::workload_jobset(spec, &system)?;
    let path = manifests::write_manifest(&ctx.log_dir, &spec.name, &yaml)?;
    run_checked(&services.executor, &commands::apply_manifest(&path), "Creating Workload").await?;

    info!(
        "Follow your workload here: https://console.cloud.google.com/kubernetes/service/{}/{}/default/{}/details?project={}",
        ctx.region(),
        ctx.cluster,
        spec.name,
        ctx.project
    );
    Ok(())
}

async fn workload_exists(services: &Services, name: &str) -> Result<bool> {
    let owners = value_checked(
        &services.executor,
        &commands::list_workload_owners(),
        "Check if Workload Already Exists",
    )
    .await
    .context("Listing workloads failed")?;
    Ok(owners.lines().any(|line| line.trim() == name))
}

async fn filtered_listing(services: &Services, filter: &WorkloadFilter) -> Result<String> {
    let listing = value_checked(&services.executor, &commands::list_workloads(), "List Jobs")
        .await
        .context("List Job request failed")?;
    Ok(filter.apply(&listing))
}

/// Deletes `workload`, or every workload passing `filter` once confirmed.
/// Returns the names a delete was issued for.
pub async fn delete(
    ctx: &RunContext,
    services: &Services,
    workload: Option<&str>,
    filter: &WorkloadFilter,
) -> Result<Vec<String>> {
    info!("Starting Workload delete");
    run_checked(&services.executor, &commands::set_credentials(ctx), "Set Cluster").await?;

    let workloads = match workload {
        Some(name) => vec![name.to_string()],
        None => {
            info!("Get the name of the workloads in the cluster.");
            let listing = filtered_listing(services, filter).await?;
            let names: Vec<String> = first_column(&listing).into_iter().skip(1).collect();
            if !names.is_empty() && !ctx.force && !confirm_delete(ctx, services, &names).await {
                info!("Skipping delete command.");
                return Ok(Vec::new());
            }
            names
        }
    };

    if workloads.is_empty() {
        info!("There are no workloads to delete matching the filter in the cluster.");
        return Ok(workloads);
    }

    for name in &workloads {
        let yaml = manifests::workload_reference(name)?;
        let path = manifests::write_manifest(&ctx.log_dir, name, &yaml)?;
        run_checked(&services.executor, &commands::delete_manifest(&path), "Delete Workload")
            .await
            .with_context(|| format!("Deleting workload {name} failed"))?;
    }
    Ok(workloads)
}

async fn confirm_delete(ctx: &RunContext, services: &Services, names: &[String]) -> bool {
    let message = format!(
        "Planning to delete {} workloads in the cluster {} including {:?}. \nDo you wish to delete: y (yes) / n (no):\n",
        names.len(),
        ctx.cluster,
        names
    );
    interaction::confirm(services.prompter.as_ref(), &message).await
}

/// Prints the workloads passing `filter` and returns what was printed.
pub async fn list(ctx: &RunContext, services: &Services, filter: &WorkloadFilter) -> Result<String> {
    info!("Starting workload list");
    run_checked(&services.executor, &commands::set_credentials(ctx), "Set Cluster").await?;

    let listing = filtered_listing(services, filter).await?;
    print!("{listing}");
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::{CapacityRecord, InMemoryRegistry};
    use crate::interaction::mocks::MockUserPrompter;
    use crate::interaction::StaticAnswer;
    use crate::subprocess::MockProcessRunner;
    use crate::workflow::test_context;
    use std::sync::Arc;

    const LISTING: &str = "\
Jobset Name  Created Time          Priority  TPU VMs Needed  TPU VMs Running/Ran  TPU VMs Done  Status    Status Message  Status Time
train-a      2024-01-01T00:00:00Z  medium    2               2                    <none>        Admitted  Admitted        2024-01-01T00:00:01Z
train-b      2024-01-01T00:00:00Z  medium    2               <none>               <none>        Admitted  Admitted        2024-01-01T00:00:01Z
eval-c       2024-01-01T00:00:00Z  low       1               1                    1             Finished  failed          2024-01-01T00:00:02Z
eval-d       2024-01-01T00:00:00Z  low       1               1                    1             Finished  finished        2024-01-01T00:00:02Z
";

    fn jobs(filtered: &str) -> Vec<String> {
        first_column(filtered).into_iter().skip(1).collect()
    }

    #[test]
    fn test_workload_names() {
        for valid in ["a", "train-1", "x9"] {
            assert!(validate_workload_name(valid).is_ok(), "{valid}");
        }
        for invalid in ["", "Train", "1train", "train-", "train_1", &"a".repeat(41)] {
            assert!(validate_workload_name(invalid).is_err(), "{invalid}");
        }
    }

    #[test]
    fn test_status_filters() {
        let cases = [
            (StatusFilter::Everything, vec!["train-a", "train-b", "eval-c", "eval-d"]),
            (StatusFilter::Running, vec!["train-a"]),
            (StatusFilter::Queued, vec!["train-b"]),
            (StatusFilter::Finished, vec!["eval-c", "eval-d"]),
            (StatusFilter::Failed, vec!["eval-c"]),
            (StatusFilter::Successful, vec!["eval-d"]),
        ];
        for (status, expected) in cases {
            let filter = WorkloadFilter::new(status, None).unwrap();
            assert_eq!(jobs(&filter.apply(LISTING)), expected, "{status:?}");
        }
    }

    #[test]
    fn test_job_filter_keeps_header() {
        let filter = WorkloadFilter::new(StatusFilter::Everything, Some("^eval")).unwrap();
        let filtered = filter.apply(LISTING);

        assert!(filtered.starts_with("Jobset Name"));
        assert_eq!(jobs(&filtered), vec!["eval-c", "eval-d"]);
        assert!(WorkloadFilter::new(StatusFilter::Everything, Some("(")).is_err());
    }

    fn spec(name: &str) -> WorkloadSpec {
        WorkloadSpec {
            name: name.into(),
            num_slices: 2,
            command: "python train.py".into(),
            docker_image: "python:3.10".into(),
            docker_name: "jax-tpu".into(),
            priority: "medium".into(),
            scheduler: "default-scheduler".into(),
            max_restarts: 0,
            termination_grace_period_seconds: 30,
            env: Vec::new(),
        }
    }

    fn services(ctx: &RunContext, mock: &MockProcessRunner, record: Option<CapacityRecord>) -> Services {
        let registry = record.map(InMemoryRegistry::with_record).unwrap_or_default();
        Services::new(ctx, Arc::new(mock.clone()), Arc::new(StaticAnswer(false)))
            .with_registry(Arc::new(registry))
    }

    fn create_request(name: &str) -> WorkloadCreateRequest {
        WorkloadCreateRequest {
            device_type: "v5p-8".into(),
            spec: spec(name),
        }
    }

    #[tokio::test]
    async fn test_create_applies_jobset() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mut mock = MockProcessRunner::new();
        mock.expect_command("get-credentials").returns_success().finish();
        mock.expect_command("get workloads").returns_stdout("Jobset\nother\n").finish();
        mock.expect_command("kubectl apply -f").returns_success().finish();
        let record = CapacityRecord::from_iter([("v5p-8".to_string(), 2)]);

        create(&ctx, &services(&ctx, &mock, Some(record)), &create_request("train-1"))
            .await
            .unwrap();

        let applied = mock
            .scripts()
            .into_iter()
            .find(|s| s.starts_with("kubectl apply -f"))
            .unwrap();
        let path = applied.trim_start_matches("kubectl apply -f ");
        assert!(std::fs::read_to_string(path).unwrap().contains("name: train-1"));
    }

    #[tokio::test]
    async fn test_create_denied_by_capacity_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mut mock = MockProcessRunner::new();
        mock.expect_command("get-credentials").returns_success().finish();
        mock.expect_command("get workloads").returns_stdout("Jobset\n").finish();
        let record = CapacityRecord::from_iter([("v5p-8".to_string(), 1)]);

        let err = create(&ctx, &services(&ctx, &mock, Some(record)), &create_request("train-1"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SliceError>(),
            Some(SliceError::CapacityExceeded { required: 2, available: 1, .. })
        ));
        assert_eq!(mock.count_calls("kubectl apply"), 0);
    }

    #[tokio::test]
    async fn test_create_refuses_existing_name() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mut mock = MockProcessRunner::new();
        mock.expect_command("get-credentials").returns_success().finish();
        mock.expect_command("get workloads").returns_stdout("Jobset\ntrain-1\n").finish();

        let err = create(&ctx, &services(&ctx, &mock, None), &create_request("train-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_invalid_name_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mock = MockProcessRunner::new();

        assert!(create(&ctx, &services(&ctx, &mock, None), &create_request("Bad_Name"))
            .await
            .is_err());
        assert!(mock.get_call_history().is_empty());
    }

    #[tokio::test]
    async fn test_delete_all_declined() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mut mock = MockProcessRunner::new();
        mock.expect_command("get-credentials").returns_success().finish();
        mock.expect_command("get workloads").returns_stdout(LISTING).finish();
        let prompter = MockUserPrompter::new();
        prompter.add_answer(false);
        let mut services = services(&ctx, &mock, None);
        services.prompter = Arc::new(prompter.clone());

        let deleted = delete(&ctx, &services, None, &WorkloadFilter::default())
            .await
            .unwrap();

        assert!(deleted.is_empty());
        assert_eq!(mock.count_calls("kubectl delete"), 0);
        assert!(prompter.questions()[0].contains("Planning to delete 4 workloads in the cluster demo"));
    }

    #[tokio::test]
    async fn test_delete_filtered_with_force() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path());
        ctx.force = true;
        let mut mock = MockProcessRunner::new();
        mock.expect_command("get-credentials").returns_success().finish();
        mock.expect_command("get workloads").returns_stdout(LISTING).finish();
        mock.expect_command("kubectl delete -f").returns_success().finish();

        let filter = WorkloadFilter::new(StatusFilter::Finished, None).unwrap();
        let deleted = delete(&ctx, &services(&ctx, &mock, None), None, &filter)
            .await
            .unwrap();

        assert_eq!(deleted, vec!["eval-c", "eval-d"]);
        assert!(mock.verify_called("kubectl delete -f", 2));
    }

    #[tokio::test]
    async fn test_delete_named_workload() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mut mock = MockProcessRunner::new();
        mock.expect_command("get-credentials").returns_success().finish();
        mock.expect_command("kubectl delete -f").returns_exit_code(1).finish();

        let err = delete(&ctx, &services(&ctx, &mock, None), Some("train-a"), &WorkloadFilter::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("train-a"));
        assert_eq!(mock.count_calls("get workloads"), 0);
    }
}
