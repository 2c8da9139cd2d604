//! Characteristics of every accelerator shape a cluster can be built from.

use crate::error::{Result, SliceError};

/// Accelerator family of a device type, with the fields only that family has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accelerator {
    Tpu {
        topology: String,
        gke_accelerator: String,
    },
    Gpu {
        gke_accelerator: String,
    },
    Cpu,
}

impl Accelerator {
    /// Kubernetes resource a container requests to get one chip.
    pub fn resource_type(&self) -> &'static str {
        match self {
            Accelerator::Tpu { .. } => "google.com/tpu",
            Accelerator::Gpu { .. } => "nvidia.com/gpu",
            Accelerator::Cpu => "cpu",
        }
    }

    /// Node selector pinning a pod to nodes with this accelerator.
    pub fn accelerator_label(&self) -> Option<(&'static str, &str)> {
        match self {
            Accelerator::Tpu {
                gke_accelerator, ..
            } => Some(("cloud.google.com/gke-tpu-accelerator", gke_accelerator)),
            Accelerator::Gpu { gke_accelerator } => {
                Some(("cloud.google.com/gke-accelerator", gke_accelerator))
            }
            Accelerator::Cpu => None,
        }
    }

    /// Node selector pinning a pod to nodes of one slice shape.
    pub fn machine_label(&self) -> Option<(&'static str, &str)> {
        match self {
            Accelerator::Tpu { topology, .. } => {
                Some(("cloud.google.com/gke-tpu-topology", topology))
            }
            _ => None,
        }
    }

    pub fn is_tpu(&self) -> bool {
        matches!(self, Accelerator::Tpu { .. })
    }

    pub fn is_cpu(&self) -> bool {
        matches!(self, Accelerator::Cpu)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCharacteristics {
    pub device_type: String,
    pub vms_per_slice: u32,
    pub machine_type: String,
    pub chips_per_vm: u32,
    pub accelerator: Accelerator,
}

struct TpuFamily {
    prefix: &'static str,
    gke_accelerator: &'static str,
    machine_type: &'static str,
    /// The size in a device name divided by this is the VM count.
    size_per_vm: u32,
    topologies: &'static [(u32, &'static str)],
}

const TPU_CHIPS_PER_VM: u32 = 4;

const TPU_FAMILIES: &[TpuFamily] = &[
    TpuFamily {
        prefix: "v5p-",
        gke_accelerator: "tpu-v5p-slice",
        machine_type: "ct5p-hightpu-4t",
        size_per_vm: 8,
        topologies: V5P_TOPOLOGIES,
    },
    TpuFamily {
        prefix: "v5litepod-",
        gke_accelerator: "tpu-v5-lite-podslice",
        machine_type: "ct5lp-hightpu-4t",
        size_per_vm: 4,
        topologies: &[(16, "4x4"), (32, "4x8"), (64, "8x8"), (128, "8x16"), (256, "16x16")],
    },
    TpuFamily {
        prefix: "v4-",
        gke_accelerator: "tpu-v4-podslice",
        machine_type: "ct4p-hightpu-4t",
        size_per_vm: 8,
        topologies: &[
            (8, "2x2x1"), (16, "2x2x2"), (32, "2x2x4"), (64, "2x4x4"), (128, "4x4x4"),
            (256, "4x4x8"), (512, "4x8x8"), (1024, "8x8x8"), (1536, "8x8x12"),
            (2048, "8x8x16"), (4096, "8x16x16"),
        ],
    },
];

#[rustfmt::skip]
const V5P_TOPOLOGIES: &[(u32, &str)] = &[
    (8, "2x2x1"), (16, "2x2x2"), (32, "2x2x4"), (64, "2x4x4"), (128, "4x4x4"),
    (256, "4x4x8"), (384, "4x4x12"), (512, "4x8x8"), (640, "4x4x20"), (768, "4x8x12"),
    (896, "4x4x28"), (1024, "8x8x8"), (1152, "4x12x12"), (1280, "4x8x20"),
    (1408, "4x4x44"), (1536, "8x8x12"), (1664, "4x4x52"), (1792, "4x8x28"),
    (1920, "4x12x20"), (2048, "8x8x16"), (2176, "4x4x68"), (2304, "8x12x12"),
    (2432, "4x4x76"), (2560, "8x8x20"), (2688, "4x12x28"), (2816, "4x8x44"),
    (2944, "4x4x92"), (3072, "4x12x16"), (3200, "4x20x20"), (3328, "4x8x52"),
    (3456, "12x12x12"), (3584, "8x8x28"), (3712, "4x4x116"), (3840, "8x12x20"),
    (3968, "4x4x124"), (4096, "8x16x16"), (4224, "4x12x44"), (4352, "4x8x68"),
    (4480, "4x20x28"), (4608, "12x12x16"), (4736, "4x4x148"), (4864, "4x8x76"),
    (4992, "4x12x52"), (5120, "8x16x20"), (5248, "4x4x164"), (5376, "8x12x28"),
    (5504, "4x4x172"), (5632, "8x8x44"), (5760, "12x12x20"), (5888, "4x8x92"),
    (6016, "4x4x188"), (6144, "12x16x16"), (6272, "4x28x28"), (6400, "8x20x20"),
    (6528, "4x12x68"), (6656, "8x8x52"), (6784, "4x4x212"), (6912, "12x12x24"),
    (7040, "4x20x44"), (7168, "8x16x28"), (7296, "4x12x76"), (7424, "4x8x116"),
    (7552, "4x4x236"), (7680, "12x16x20"), (7808, "4x4x244"), (7936, "4x8x124"),
    (8064, "12x12x28"), (8192, "16x16x16"), (8320, "4x20x52"), (8448, "8x12x44"),
    (8704, "8x8x68"), (8832, "4x12x92"), (8960, "8x20x28"), (9216, "12x16x24"),
    (9472, "4x8x148"), (9600, "12x20x20"), (9728, "8x8x76"), (9856, "4x28x44"),
    (9984, "8x12x52"), (10240, "16x16x20"), (10368, "12x12x36"), (10496, "4x8x164"),
    (10752, "12x16x28"), (10880, "4x20x68"), (11008, "4x8x172"), (11136, "4x12x116"),
    (11264, "8x16x44"), (11520, "12x20x24"), (11648, "4x28x52"), (11776, "8x8x92"),
    (11904, "4x12x124"), (12032, "4x8x188"), (12160, "4x20x76"), (12288, "16x16x24"),
    (13824, "12x24x24"), (17920, "16x20x28"),
];

const A100_CHIP_COUNTS: &[u32] = &[1, 2, 4, 8];
const CPU_MACHINE_TYPE: &str = "n2-standard-32";
const MAX_CPU_VMS: u32 = 2048;

fn size_suffix(device_type: &str, prefix: &str) -> Option<u32> {
    device_type.strip_prefix(prefix)?.parse().ok()
}

fn tpu(device_type: &str) -> Option<SystemCharacteristics> {
    TPU_FAMILIES.iter().find_map(|family| {
        let size = size_suffix(device_type, family.prefix)?;
        let (_, topology) = family.topologies.iter().find(|(s, _)| *s == size)?;
        Some(SystemCharacteristics {
            device_type: device_type.to_string(),
            vms_per_slice: size / family.size_per_vm,
            machine_type: family.machine_type.to_string(),
            chips_per_vm: TPU_CHIPS_PER_VM,
            accelerator: Accelerator::Tpu {
                topology: topology.to_string(),
                gke_accelerator: family.gke_accelerator.to_string(),
            },
        })
    })
}

fn gpu(device_type: &str) -> Option<SystemCharacteristics> {
    let (machine_type, chips, gke_accelerator) = if device_type == "h100-80gb-8" {
        ("a3-highgpu-8g".to_string(), 8, "nvidia-h100-80gb")
    } else {
        let chips = size_suffix(device_type, "a100-40gb-")?;
        if !A100_CHIP_COUNTS.contains(&chips) {
            return None;
        }
        (format!("a2-highgpu-{chips}g"), chips, "nvidia-tesla-a100")
    };

    Some(SystemCharacteristics {
        device_type: device_type.to_string(),
        vms_per_slice: 1,
        machine_type,
        chips_per_vm: chips,
        accelerator: Accelerator::Gpu {
            gke_accelerator: gke_accelerator.to_string(),
        },
    })
}

fn cpu(device_type: &str) -> Option<SystemCharacteristics> {
    let vms = size_suffix(device_type, &format!("{CPU_MACHINE_TYPE}-"))?;
    if !vms.is_power_of_two() || vms > MAX_CPU_VMS {
        return None;
    }
    Some(SystemCharacteristics {
        device_type: device_type.to_string(),
        vms_per_slice: vms,
        machine_type: CPU_MACHINE_TYPE.to_string(),
        chips_per_vm: 1,
        accelerator: Accelerator::Cpu,
    })
}

/// Resolves a user-facing device type such as `v5p-128` or `a100-40gb-8`.
pub fn lookup(device_type: &str) -> Result<SystemCharacteristics> {
    tpu(device_type)
        .or_else(|| gpu(device_type))
        .or_else(|| cpu(device_type))
        .ok_or_else(|| SliceError::UnknownDeviceType(device_type.to_string()))
}

/// Every device type [`lookup`] accepts.
pub fn device_types() -> Vec<String> {
    let mut types: Vec<String> = A100_CHIP_COUNTS
        .iter()
        .map(|chips| format!("a100-40gb-{chips}"))
        .collect();
    types.push("h100-80gb-8".to_string());
    for family in TPU_FAMILIES {
        types.extend(
            family
                .topologies
                .iter()
                .map(|(size, _)| format!("{}{}", family.prefix, size)),
        );
    }
    let mut vms = 1;
    while vms <= MAX_CPU_VMS {
        types.push(format!("{CPU_MACHINE_TYPE}-{vms}"));
        vms *= 2;
    }
    types
}
