//! In-memory collaborators and object builders for tests

use crate::cluster::{ClusterClient, API_NAME_LABEL, INSTANCE_TYPE_LABEL, WORKLOAD_LABEL};
use crate::error::{Error, Result};
use crate::models::VirtualService;
use crate::storage::{ObjectStore, S3Path};
use crate::telemetry::TelemetrySink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::autoscaling::v1::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, Node, NodeStatus, Pod, PodCondition, PodSpec, PodStatus, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub struct FakeObjectStore {
    bucket: String,
    keys: BTreeSet<String>,
    listing_fails: AtomicBool,
}

impl FakeObjectStore {
    pub fn with_keys(bucket: &str, keys: &[&str]) -> Self {
        Self {
            bucket: bucket.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            listing_fails: AtomicBool::new(false),
        }
    }

    pub fn fail_listing(&self) {
        self.listing_fails.store(true, Ordering::SeqCst);
    }

    fn in_bucket(&self, bucket: &str) -> bool {
        bucket == self.bucket
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn is_file(&self, path: &S3Path) -> Result<bool> {
        Ok(self.in_bucket(&path.bucket) && self.keys.contains(&path.key))
    }

    async fn is_prefix(&self, path: &S3Path) -> Result<bool> {
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(Error::object_store("listing disabled"));
        }
        Ok(self.in_bucket(&path.bucket) && self.keys.iter().any(|k| k.starts_with(&path.key)))
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(Error::object_store("listing disabled"));
        }
        if !self.in_bucket(bucket) {
            return Ok(Vec::new());
        }
        Ok(self
            .keys
            .iter()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct ClusterState {
    virtual_services: Vec<VirtualService>,
    nodes: Vec<Node>,
    config_maps: BTreeMap<String, ConfigMap>,
    deployments: Vec<Deployment>,
    pods: Vec<Pod>,
    hpas: BTreeMap<String, HorizontalPodAutoscaler>,
    failing: HashSet<&'static str>,
    failing_once: HashSet<&'static str>,
    deleted_pods: Vec<String>,
    created_hpas: Vec<String>,
    applied_config_maps: Vec<String>,
    labeled_pod_lists: usize,
}

/// In-memory cluster that records every write
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named trait operation return an error
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    /// Fail only the next call of the named operation
    pub fn fail_once(&self, operation: &'static str) {
        self.state.lock().unwrap().failing_once.insert(operation);
    }

    pub fn add_virtual_service(&self, vs: VirtualService) {
        self.state.lock().unwrap().virtual_services.push(vs);
    }

    pub fn add_node(&self, node: Node) {
        self.state.lock().unwrap().nodes.push(node);
    }

    pub fn add_config_map(&self, cm: ConfigMap) {
        let mut state = self.state.lock().unwrap();
        state.config_maps.insert(cm.name_any(), cm);
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        self.state.lock().unwrap().deployments.push(deployment);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().unwrap().pods.push(pod);
    }

    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.state.lock().unwrap().config_maps.get(name).cloned()
    }

    pub fn hpa(&self, name: &str) -> Option<HorizontalPodAutoscaler> {
        self.state.lock().unwrap().hpas.get(name).cloned()
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_pods.clone()
    }

    pub fn created_hpas(&self) -> Vec<String> {
        self.state.lock().unwrap().created_hpas.clone()
    }

    pub fn applied_config_maps(&self) -> Vec<String> {
        self.state.lock().unwrap().applied_config_maps.clone()
    }

    pub fn labeled_pod_lists(&self) -> usize {
        self.state.lock().unwrap().labeled_pod_lists
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(operation) || state.failing_once.remove(operation) {
            return Err(Error::cluster(format!("{} failed", operation)));
        }
        Ok(())
    }
}

fn has_label<K: kube::Resource>(obj: &K, label: &str) -> bool {
    obj.meta()
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key(label))
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>> {
        self.check("list_virtual_services")?;
        Ok(self.state.lock().unwrap().virtual_services.clone())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.check("list_nodes")?;
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>> {
        self.check("get_config_map")?;
        Ok(self.config_map(name))
    }

    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<()> {
        self.check("apply_config_map")?;
        let mut state = self.state.lock().unwrap();
        let name = config_map.name_any();
        state.applied_config_maps.push(name.clone());
        state.config_maps.insert(name, config_map);
        Ok(())
    }

    async fn list_deployments_with_label(&self, label: &str) -> Result<Vec<Deployment>> {
        self.check("list_deployments_with_label")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .deployments
            .iter()
            .filter(|d| has_label(*d, label))
            .cloned()
            .collect())
    }

    async fn list_pods_with_label(&self, label: &str) -> Result<Vec<Pod>> {
        self.check("list_pods_with_label")?;
        let mut state = self.state.lock().unwrap();
        state.labeled_pod_lists += 1;
        Ok(state
            .pods
            .iter()
            .filter(|p| has_label(*p, label))
            .cloned()
            .collect())
    }

    async fn list_failed_pods(&self) -> Result<Vec<Pod>> {
        self.check("list_failed_pods")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|p| {
                p.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .is_some_and(|phase| phase == "Failed")
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.check("delete_pod")?;
        let mut state = self.state.lock().unwrap();
        state.pods.retain(|p| p.name_any() != name);
        state.deleted_pods.push(name.to_string());
        Ok(())
    }

    async fn hpa_exists(&self, name: &str) -> Result<bool> {
        self.check("hpa_exists")?;
        Ok(self.state.lock().unwrap().hpas.contains_key(name))
    }

    async fn create_hpa(&self, hpa: HorizontalPodAutoscaler) -> Result<()> {
        self.check("create_hpa")?;
        let mut state = self.state.lock().unwrap();
        let name = hpa.name_any();
        state.created_hpas.push(name.clone());
        state.hpas.insert(name, hpa);
        Ok(())
    }
}

/// Telemetry sink that keeps everything it receives
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, Value)>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn event(&self, name: &str, properties: Value) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), properties));
    }

    fn error(&self, err: &Error) {
        self.errors.lock().unwrap().push(err.to_string());
    }
}

fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    Some(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

fn api_container(image: &str) -> Container {
    Container {
        name: "api".to_string(),
        image: Some(image.to_string()),
        ..Default::default()
    }
}

/// Running pod of an API with a single "api" container
pub fn pod(name: &str, api: &str, image: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: labels(&[(API_NAME_LABEL, api)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![api_container(image)],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Pod in the Failed phase with the given status reason
pub fn failed_pod(name: &str, reason: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some("Failed".to_string()),
            reason: Some(reason.to_string()),
            ..Default::default()
        }),
    }
}

/// API deployment carrying autoscaling annotations min 1, max 5, target 80
pub fn deployment(api: &str, replicas: i32, image: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(api.to_string()),
            labels: labels(&[(API_NAME_LABEL, api)]),
            annotations: labels(&[
                ("minReplicas", "1"),
                ("maxReplicas", "5"),
                ("targetCPUUtilization", "80"),
            ]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![api_container(image)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Set a True Progressing condition last updated at `updated_at`
pub fn with_progress(mut deployment: Deployment, updated_at: DateTime<Utc>) -> Deployment {
    deployment.status = Some(DeploymentStatus {
        conditions: Some(vec![DeploymentCondition {
            type_: "Progressing".to_string(),
            status: "True".to_string(),
            last_update_time: Some(Time(updated_at)),
            ..Default::default()
        }]),
        ..Default::default()
    });
    deployment
}

pub fn node(name: &str, worker: bool, instance_type: Option<&str>, allocatable_mem: &str) -> Node {
    let mut node_labels = BTreeMap::new();
    if worker {
        node_labels.insert(WORKLOAD_LABEL.to_string(), "true".to_string());
    }
    if let Some(t) = instance_type {
        node_labels.insert(INSTANCE_TYPE_LABEL.to_string(), t.to_string());
    }

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(node_labels),
            ..Default::default()
        },
        spec: None,
        status: Some(NodeStatus {
            allocatable: Some(
                [("memory".to_string(), KubeQuantity(allocatable_mem.to_string()))].into(),
            ),
            ..Default::default()
        }),
    }
}

pub fn gateway_service(name: &str, api: &str, gateway: &str, endpoints: &[&str]) -> VirtualService {
    VirtualService {
        name: name.to_string(),
        gateways: vec![gateway.to_string()],
        endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
        labels: [(API_NAME_LABEL.to_string(), api.to_string())].into(),
    }
}
