use std::sync::Arc;
use tracing::{error, info};

use super::{CapacityRecord, CapacityRegistry};
use crate::error::{Result, SliceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The record names other device types but not this one.
    DeviceTypeUnavailable {
        device_type: String,
        available: Vec<String>,
    },
    CapacityExceeded {
        device_type: String,
        required: u64,
        available: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny(DenyReason),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Admission::Allow => Ok(()),
            Admission::Deny(DenyReason::DeviceTypeUnavailable {
                device_type,
                available,
            }) => Err(SliceError::DeviceTypeUnavailable {
                device_type,
                available,
            }),
            Admission::Deny(DenyReason::CapacityExceeded {
                device_type,
                required,
                available,
            }) => Err(SliceError::CapacityExceeded {
                device_type,
                required,
                available,
            }),
        }
    }
}

/// Decides whether `num_slices` slices of `vms_per_slice` VMs fit.
///
/// No record means the cluster is uncapped. Using exactly the recorded
/// capacity is allowed.
pub fn can_schedule(
    device_type: &str,
    num_slices: u32,
    vms_per_slice: u32,
    record: Option<&CapacityRecord>,
) -> Admission {
    let Some(record) = record else {
        return Admission::Allow;
    };

    let Some(available) = record.get(device_type) else {
        return Admission::Deny(DenyReason::DeviceTypeUnavailable {
            device_type: device_type.to_string(),
            available: record.device_types(),
        });
    };

    let required = u64::from(num_slices).saturating_mul(u64::from(vms_per_slice));
    if required > available {
        return Admission::Deny(DenyReason::CapacityExceeded {
            device_type: device_type.to_string(),
            required,
            available,
        });
    }

    Admission::Allow
}

/// Runs [`can_schedule`] against a fresh read of the registry.
pub struct AdmissionController {
    registry: Arc<dyn CapacityRegistry>,
}

impl AdmissionController {
    pub fn new(registry: Arc<dyn CapacityRegistry>) -> Self {
        Self { registry }
    }

    pub async fn check(&self, device_type: &str, num_slices: u32, vms_per_slice: u32) -> Admission {
        let record = self.registry.get().await;
        if record.is_none() {
            info!("No capacity recorded for the cluster, admitting {}", device_type);
        }

        let admission = can_schedule(device_type, num_slices, vms_per_slice, record.as_ref());
        if let Admission::Deny(reason) = &admission {
            error!("Workload cannot be scheduled: {:?}", reason);
        }
        admission
    }
}
