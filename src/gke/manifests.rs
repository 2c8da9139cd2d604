//! Kubernetes manifests rendered from `serde_json` value trees.

use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use crate::capacity::CapacityRecord;
use crate::error::Result;
use crate::system::{Accelerator, SystemCharacteristics};

pub const LOCAL_QUEUE: &str = "multislice-queue";
pub const CLUSTER_QUEUE: &str = "cluster-queue";
pub const WORKLOAD_LABEL: &str = "slicekit.dev/workload";

/// `(name, value, description)` of the priority classes a cluster gets.
pub const PRIORITY_CLASSES: &[(&str, u32, &str)] = &[
    ("very-low", 100, "Very Low"),
    ("low", 250, "Low"),
    ("medium", 500, "Medium"),
    ("high", 750, "High"),
    ("very-high", 1000, "Very High"),
];

pub fn configmap_name(cluster: &str) -> String {
    format!("{cluster}-resources-configmap")
}

fn to_yaml(documents: &[Value]) -> Result<String> {
    let mut out = String::new();
    for (i, document) in documents.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(document)?);
    }
    Ok(out)
}

fn node_labels(accelerator: &Accelerator) -> Map<String, Value> {
    let mut labels = Map::new();
    for (key, value) in accelerator
        .accelerator_label()
        .into_iter()
        .chain(accelerator.machine_label())
    {
        labels.insert(key.to_string(), Value::String(value.to_string()));
    }
    labels
}

/// ConfigMap recording how many VMs of each device type the cluster holds.
pub fn capacity_configmap(cluster: &str, record: &CapacityRecord) -> Result<String> {
    let data: Map<String, Value> = record
        .iter()
        .map(|(device, vms)| (device.clone(), Value::String(vms.to_string())))
        .collect();

    to_yaml(&[json!({
        "kind": "ConfigMap",
        "apiVersion": "v1",
        "metadata": { "name": configmap_name(cluster) },
        "data": data,
    })])
}

/// ResourceFlavor, queues and priority classes for a cluster of
/// `num_slices` slices of `system`.
pub fn kueue_resources(num_slices: u32, system: &SystemCharacteristics) -> Result<String> {
    let flavor = format!("{}x{}", num_slices, system.device_type);
    let resource_type = system.accelerator.resource_type();
    let total_chips =
        u64::from(num_slices) * u64::from(system.vms_per_slice) * u64::from(system.chips_per_vm);

    let mut documents = vec![
        json!({
            "apiVersion": "kueue.x-k8s.io/v1beta1",
            "kind": "ResourceFlavor",
            "metadata": { "name": flavor },
            "spec": { "nodeLabels": node_labels(&system.accelerator) },
        }),
        json!({
            "apiVersion": "kueue.x-k8s.io/v1beta1",
            "kind": "ClusterQueue",
            "metadata": { "name": CLUSTER_QUEUE },
            "spec": {
                "preemption": {
                    "reclaimWithinCohort": "Never",
                    "withinClusterQueue": "LowerPriority",
                },
                "namespaceSelector": {},
                "resourceGroups": [{
                    "coveredResources": [resource_type],
                    "flavors": [{
                        "name": flavor,
                        "resources": [{ "name": resource_type, "nominalQuota": total_chips }],
                    }],
                }],
            },
        }),
        json!({
            "apiVersion": "kueue.x-k8s.io/v1beta1",
            "kind": "LocalQueue",
            "metadata": { "namespace": "default", "name": LOCAL_QUEUE },
            "spec": { "clusterQueue": CLUSTER_QUEUE },
        }),
    ];

    documents.extend(PRIORITY_CLASSES.iter().map(|(name, value, description)| {
        json!({
            "apiVersion": "scheduling.k8s.io/v1",
            "kind": "PriorityClass",
            "metadata": { "name": name },
            "value": value,
            "globalDefault": false,
            "description": description,
        })
    }));

    to_yaml(&documents)
}

/// What `workload create` submits.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub name: String,
    pub num_slices: u32,
    pub command: String,
    pub docker_image: String,
    pub docker_name: String,
    pub priority: String,
    pub scheduler: String,
    pub max_restarts: u32,
    pub termination_grace_period_seconds: u32,
    pub env: Vec<(String, String)>,
}

fn wrap_command(command: &str) -> String {
    format!(
        "echo Start: $(date) ; _sigterm() ( kill -SIGTERM $!;); trap _sigterm SIGTERM; \
         ({command}) & PID=$!; while kill -0 $PID 2>/dev/null; do sleep 5; done; \
         EXIT_CODE=$? ; echo End: $(date); echo EXIT_CODE=$EXIT_CODE"
    )
}

fn field_ref_env(name: &str, path: &str) -> Value {
    json!({ "name": name, "valueFrom": { "fieldRef": { "fieldPath": path } } })
}

/// Variables a multi-process JAX job on CPU nodes needs to find its peers.
fn cpu_env(num_slices: u32, system: &SystemCharacteristics) -> Vec<Value> {
    vec![
        field_ref_env(
            "REPLICATED_JOB_NAME",
            "metadata.annotations['jobset.sigs.k8s.io/replicatedjob-name']",
        ),
        field_ref_env(
            "JOBSET_NAME",
            "metadata.annotations['jobset.sigs.k8s.io/jobset-name']",
        ),
        json!({
            "name": "JAX_COORDINATOR_ADDRESS",
            "value": "$(JOBSET_NAME)-$(REPLICATED_JOB_NAME)-0-0.$(JOBSET_NAME)",
        }),
        field_ref_env("JOB_INDEX", "metadata.annotations['jobset.sigs.k8s.io/job-index']"),
        field_ref_env(
            "JOB_COMPLETION_INDEX",
            "metadata.annotations['batch.kubernetes.io/job-completion-index']",
        ),
        json!({ "name": "PROCESSES_IN_JOB", "value": system.vms_per_slice.to_string() }),
        json!({
            "name": "JAX_PROCESS_COUNT",
            "value": (u64::from(num_slices) * u64::from(system.vms_per_slice)).to_string(),
        }),
    ]
}

fn container(spec: &WorkloadSpec, system: &SystemCharacteristics) -> Value {
    let mut env: Vec<Value> = spec
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    let mut ports = vec![json!({ "containerPort": 8471 }), json!({ "containerPort": 8080 })];

    if system.accelerator.is_cpu() {
        env.extend(cpu_env(spec.num_slices, system));
        ports.push(json!({ "containerPort": 1234 }));
    }

    let mut limits = Map::new();
    limits.insert(
        system.accelerator.resource_type().to_string(),
        json!(system.chips_per_vm),
    );

    json!({
        "name": spec.docker_name,
        "image": spec.docker_image,
        "env": env,
        "ports": ports,
        "securityContext": { "privileged": true },
        "command": ["bash", "-c", wrap_command(&spec.command)],
        "resources": { "limits": limits },
        "volumeMounts": [{ "mountPath": "/dev/shm", "name": "dshm-2" }],
    })
}

/// JobSet with one replicated job per slice.
pub fn workload_jobset(spec: &WorkloadSpec, system: &SystemCharacteristics) -> Result<String> {
    let mut pod_spec = json!({
        "schedulerName": spec.scheduler,
        "restartPolicy": "Never",
        "nodeSelector": node_labels(&system.accelerator),
        "priorityClassName": spec.priority,
        "hostNetwork": true,
        "dnsPolicy": "ClusterFirstWithHostNet",
        "terminationGracePeriodSeconds": spec.termination_grace_period_seconds,
        "containers": [container(spec, system)],
        "volumes": [{ "emptyDir": { "medium": "Memory" }, "name": "dshm-2" }],
    });

    // CPU workloads must stay off the default pool
    if system.accelerator.is_cpu() {
        pod_spec["affinity"] = json!({
            "nodeAffinity": {
                "requiredDuringSchedulingIgnoredDuringExecution": {
                    "nodeSelectorTerms": [{
                        "matchExpressions": [{
                            "key": "cloud.google.com/gke-nodepool",
                            "operator": "NotIn",
                            "values": ["default-pool"],
                        }],
                    }],
                },
            },
        });
    }

    to_yaml(&[json!({
        "apiVersion": "jobset.x-k8s.io/v1alpha2",
        "kind": "JobSet",
        "metadata": {
            "name": spec.name,
            "labels": {
                "kueue.x-k8s.io/queue-name": LOCAL_QUEUE,
                WORKLOAD_LABEL: spec.name,
            },
            "annotations": {
                "alpha.jobset.sigs.k8s.io/exclusive-topology": "cloud.google.com/gke-nodepool",
            },
        },
        "spec": {
            "failurePolicy": { "maxRestarts": spec.max_restarts },
            "replicatedJobs": [{
                "name": "slice-job",
                "replicas": spec.num_slices,
                "template": {
                    "spec": {
                        "parallelism": system.vms_per_slice,
                        "completions": system.vms_per_slice,
                        "backoffLimit": 0,
                        "template": {
                            "metadata": { "labels": { WORKLOAD_LABEL: spec.name } },
                            "spec": pod_spec,
                        },
                    },
                },
            }],
        },
    })])
}

/// Enough of a JobSet for `kubectl delete -f` to find it.
pub fn workload_reference(name: &str) -> Result<String> {
    to_yaml(&[json!({
        "apiVersion": "jobset.x-k8s.io/v1alpha2",
        "kind": "JobSet",
        "metadata": { "name": name },
    })])
}

/// Writes `contents` to a new file under `dir` that outlives this process.
pub fn write_manifest(dir: &Path, prefix: &str, contents: &str) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("{prefix}-"))
        .suffix(".yaml")
        .tempfile_in(dir)?;
    std::io::Write::write_all(&mut file, contents.as_bytes())?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system;

    fn parse_all(yaml: &str) -> Vec<serde_yaml::Value> {
        yaml.split("---\n")
            .map(|doc| serde_yaml::from_str(doc).unwrap())
            .collect()
    }

    fn spec() -> WorkloadSpec {
        WorkloadSpec {
            name: "train-1".into(),
            num_slices: 2,
            command: "python train.py".into(),
            docker_image: "python:3.10".into(),
            docker_name: "jax-tpu".into(),
            priority: "medium".into(),
            scheduler: "default-scheduler".into(),
            max_restarts: 0,
            termination_grace_period_seconds: 30,
            env: vec![("MODE".into(), "fast".into())],
        }
    }

    #[test]
    fn test_capacity_configmap() {
        let record = CapacityRecord::from_iter([("v5p-128".to_string(), 32)]);
        let yaml = capacity_configmap("demo", &record).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(doc["metadata"]["name"].as_str(), Some("demo-resources-configmap"));
        assert_eq!(doc["data"]["v5p-128"].as_str(), Some("32"));
    }

    #[test]
    fn test_kueue_resources_quota_and_labels() {
        let system = system::lookup("v5litepod-16").unwrap();
        let docs = parse_all(&kueue_resources(2, &system).unwrap());

        assert_eq!(docs.len(), 8);
        assert_eq!(docs[0]["metadata"]["name"].as_str(), Some("2xv5litepod-16"));
        assert_eq!(
            docs[0]["spec"]["nodeLabels"]["cloud.google.com/gke-tpu-topology"].as_str(),
            Some("4x4")
        );
        let quota = &docs[1]["spec"]["resourceGroups"][0]["flavors"][0]["resources"][0];
        assert_eq!(quota["name"].as_str(), Some("google.com/tpu"));
        assert_eq!(quota["nominalQuota"].as_u64(), Some(2 * 4 * 4));
        assert_eq!(docs[2]["metadata"]["name"].as_str(), Some("multislice-queue"));
        assert_eq!(docs[7]["value"].as_u64(), Some(1000));
    }

    #[test]
    fn test_tpu_jobset() {
        let system = system::lookup("v5p-8").unwrap();
        let doc: serde_yaml::Value =
            serde_yaml::from_str(&workload_jobset(&spec(), &system).unwrap()).unwrap();

        let job = &doc["spec"]["replicatedJobs"][0];
        assert_eq!(job["replicas"].as_u64(), Some(2));
        assert_eq!(job["template"]["spec"]["parallelism"].as_u64(), Some(1));

        let pod = &job["template"]["spec"]["template"]["spec"];
        assert_eq!(
            pod["nodeSelector"]["cloud.google.com/gke-tpu-accelerator"].as_str(),
            Some("tpu-v5p-slice")
        );
        assert!(pod.get("affinity").is_none());
        let container = &pod["containers"][0];
        assert_eq!(container["resources"]["limits"]["google.com/tpu"].as_u64(), Some(4));
        assert!(container["command"][2].as_str().unwrap().contains("(python train.py)"));
        assert_eq!(container["env"][0]["name"].as_str(), Some("MODE"));
    }

    #[test]
    fn test_cpu_jobset_gets_affinity_and_jax_env() {
        let system = system::lookup("n2-standard-32-4").unwrap();
        let doc: serde_yaml::Value =
            serde_yaml::from_str(&workload_jobset(&spec(), &system).unwrap()).unwrap();

        let pod = &doc["spec"]["replicatedJobs"][0]["template"]["spec"]["template"]["spec"];
        assert!(pod.get("affinity").is_some());
        let env = pod["containers"][0]["env"].as_sequence().unwrap();
        let count = env
            .iter()
            .find(|e| e["name"].as_str() == Some("JAX_PROCESS_COUNT"))
            .unwrap();
        assert_eq!(count["value"].as_str(), Some("8"));
    }

    #[test]
    fn test_write_manifest_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), "kueue", "kind: Test\n").unwrap();

        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("kueue-"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "kind: Test\n");
    }
}
