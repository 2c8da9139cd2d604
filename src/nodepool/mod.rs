//! Converges the node pools of a cluster toward a desired set.
//!
//! Only pools whose names carry the managed prefix are ever deleted. The
//! commands that create or delete a pool come from a [`NodePoolCommands`]
//! implementation; this module decides which pools to touch and in what order.

use std::collections::HashSet;
use tracing::info;

use crate::dispatch::{BatchDispatcher, BatchResult, Task};
use crate::error::Result;
use crate::interaction::{self, UserPrompter};
use crate::subprocess::ProcessCommand;

/// Prefix shared by every node pool a cluster owns.
pub fn managed_prefix(cluster: &str) -> String {
    format!("{cluster}-np-")
}

/// Names of the pools a cluster with `num_slices` slices should have.
pub fn desired_pool_names(cluster: &str, num_slices: u32) -> Vec<String> {
    let prefix = managed_prefix(cluster);
    (0..num_slices).map(|i| format!("{prefix}{i}")).collect()
}

/// Builds the provider commands for one node pool.
pub trait NodePoolCommands: Send + Sync {
    fn create_command(&self, name: &str) -> ProcessCommand;
    fn delete_command(&self, name: &str) -> ProcessCommand;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub to_create: Vec<String>,
    pub to_delete: Vec<String>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Diffs `desired` against `existing`.
///
/// Both inputs are treated as sets; duplicates are ignored and the first
/// occurrence decides ordering.
pub fn plan(desired: &[String], existing: &[String], managed_prefix: &str) -> ReconciliationPlan {
    let desired = unique(desired);
    let existing = unique(existing);

    let existing_set: HashSet<&str> = existing.iter().copied().collect();
    let desired_set: HashSet<&str> = desired.iter().copied().collect();

    let to_create = desired
        .iter()
        .filter(|name| !existing_set.contains(*name))
        .map(|name| name.to_string())
        .collect();
    let to_delete = existing
        .iter()
        .filter(|name| name.starts_with(managed_prefix) && !desired_set.contains(*name))
        .map(|name| name.to_string())
        .collect();

    ReconciliationPlan {
        to_create,
        to_delete,
    }
}

fn unique(names: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(String::as_str)
        .filter(|name| seen.insert(*name))
        .collect()
}

#[derive(Debug)]
pub struct ReconcileOutcome {
    pub plan: ReconciliationPlan,
    /// False when deletions were planned but not confirmed.
    pub deletions_approved: bool,
    pub batch: BatchResult,
}

pub struct NodePoolReconciler<'a> {
    dispatcher: &'a BatchDispatcher,
    prompter: &'a dyn UserPrompter,
    batch_size: usize,
    force: bool,
}

impl<'a> NodePoolReconciler<'a> {
    pub fn new(
        dispatcher: &'a BatchDispatcher,
        prompter: &'a dyn UserPrompter,
        batch_size: usize,
    ) -> Self {
        Self {
            dispatcher,
            prompter,
            batch_size,
            force: false,
        }
    }

    /// Skip the confirmation step; planned deletions always run.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Plans, confirms deletions, and dispatches creates ahead of deletes in
    /// a single batch. A failed batch is returned as
    /// [`crate::error::SliceError::AggregateFailure`].
    pub async fn reconcile(
        &self,
        desired: &[String],
        existing: &[String],
        managed_prefix: &str,
        commands: &dyn NodePoolCommands,
    ) -> Result<ReconcileOutcome> {
        let mut plan = plan(desired, existing, managed_prefix);
        info!(
            "Node pools to create: {:?}, to delete: {:?}",
            plan.to_create, plan.to_delete
        );

        let deletions_approved = self.confirm_deletions(&plan.to_delete).await;
        if !deletions_approved {
            info!("Skipping delete commands. Continuing to next step.");
            plan.to_delete.clear();
        }

        let creates = plan.to_create.iter().map(|name| {
            Task::new(format!("NodepoolCreate-{name}"), commands.create_command(name))
        });
        let deletes = plan.to_delete.iter().map(|name| {
            Task::new(format!("Nodepool-Delete-{name}"), commands.delete_command(name))
        });
        let tasks: Vec<Task> = creates.chain(deletes).collect();

        for task in &tasks {
            info!("To complete {} we are executing {}", task.id, task.command.script);
        }

        let batch = self
            .dispatcher
            .run_batch("Create and Delete Nodepools", tasks, self.batch_size)
            .await?
            .ensure_success()?;
        info!("Create or delete node pool request complete.");

        Ok(ReconcileOutcome {
            plan,
            deletions_approved,
            batch,
        })
    }

    async fn confirm_deletions(&self, to_delete: &[String]) -> bool {
        if to_delete.is_empty() || self.force {
            return true;
        }

        let message = format!(
            "Planning to delete {} node pools including {:?}. \nDo you wish to delete: y (yes) / n (no):\n",
            to_delete.len(),
            to_delete
        );
        interaction::confirm(self.prompter, &message).await
    }
}
