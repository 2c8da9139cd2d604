//! How many VMs of each device type a cluster was built with.
//!
//! The record lives outside this process and is advisory: it is never
//! locked, and every read is a snapshot that may already be stale.

pub mod admission;

pub use admission::{can_schedule, Admission, AdmissionController, DenyReason};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Result, SliceError};
use crate::gke::{commands, manifests};
use crate::subprocess::CommandExecutor;

/// Device type to VM count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityRecord(BTreeMap<String, u64>);

impl CapacityRecord {
    /// Parses `map[key1:value1 key2:value2]`.
    ///
    /// Anything that is not exactly that shape, or that holds no pairs,
    /// yields `None`.
    pub fn parse(payload: &str) -> Option<Self> {
        let inner = payload.trim().strip_prefix("map[")?.strip_suffix(']')?;

        let mut record = BTreeMap::new();
        for pair in inner.split_whitespace() {
            let (key, value) = pair.split_once(':')?;
            if key.is_empty() {
                return None;
            }
            record.insert(key.to_string(), value.parse().ok()?);
        }

        (!record.is_empty()).then_some(Self(record))
    }

    pub fn get(&self, device_type: &str) -> Option<u64> {
        self.0.get(device_type).copied()
    }

    /// Sets the count for `device_type`, replacing any previous value.
    pub fn insert(&mut self, device_type: impl Into<String>, vm_count: u64) {
        self.0.insert(device_type.into(), vm_count);
    }

    pub fn device_types(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, u64)> for CapacityRecord {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[async_trait]
pub trait CapacityRegistry: Send + Sync {
    /// Current record, or `None` when there is none or it cannot be read.
    async fn get(&self) -> Option<CapacityRecord>;

    /// Upserts one device type's VM count.
    async fn put(&self, device_type: &str, vm_count: u64) -> Result<()>;
}

/// Registry stored in the `<cluster>-resources-configmap` ConfigMap.
pub struct ConfigMapRegistry {
    executor: CommandExecutor,
    cluster: String,
    manifest_dir: PathBuf,
}

impl ConfigMapRegistry {
    pub fn new(
        executor: CommandExecutor,
        cluster: impl Into<String>,
        manifest_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executor,
            cluster: cluster.into(),
            manifest_dir: manifest_dir.into(),
        }
    }

    fn configmap_name(&self) -> String {
        manifests::configmap_name(&self.cluster)
    }
}

#[async_trait]
impl CapacityRegistry for ConfigMapRegistry {
    async fn get(&self) -> Option<CapacityRecord> {
        let name = self.configmap_name();
        let command = commands::get_configmap(&name);

        let payload = match self
            .executor
            .execute_for_value(&command, "Capacity ConfigMap", "map[]")
            .await
        {
            Ok((0, payload)) => payload,
            Ok((code, _)) => {
                warn!("Unable to read {} (exit code {}), assuming no capacity limits", name, code);
                return None;
            }
            Err(err) => {
                warn!("Unable to read {}: {}, assuming no capacity limits", name, err);
                return None;
            }
        };

        let record = CapacityRecord::parse(&payload);
        if record.is_none() {
            debug!("No capacity recorded in {}: {:?}", name, payload.trim());
        }
        record
    }

    async fn put(&self, device_type: &str, vm_count: u64) -> Result<()> {
        let mut record = self.get().await.unwrap_or_default();
        record.insert(device_type, vm_count);

        let yaml = manifests::capacity_configmap(&self.cluster, &record)?;
        let path = manifests::write_manifest(&self.manifest_dir, &self.configmap_name(), &yaml)?;

        let task = "ConfigMap Apply";
        let exit_code = self
            .executor
            .execute(&commands::apply_manifest(&path), task)
            .await?;
        if exit_code != 0 {
            return Err(SliceError::ExecutionFailure {
                task: task.to_string(),
                exit_code,
            });
        }
        Ok(())
    }
}

/// Registry held in process memory. Clones share the same record.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    record: Arc<RwLock<Option<CapacityRecord>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CapacityRecord) -> Self {
        Self {
            record: Arc::new(RwLock::new(Some(record))),
        }
    }
}

#[async_trait]
impl CapacityRegistry for InMemoryRegistry {
    async fn get(&self) -> Option<CapacityRecord> {
        self.record.read().await.clone()
    }

    async fn put(&self, device_type: &str, vm_count: u64) -> Result<()> {
        self.record
            .write()
            .await
            .get_or_insert_with(CapacityRecord::default)
            .insert(device_type, vm_count);
        Ok(())
    }
}
