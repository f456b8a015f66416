//! Cluster capability
//!
//! The validator and the reconciler only talk to Kubernetes through
//! [`ClusterClient`], so tests can substitute an in-memory cluster.

mod kube_client;
mod pods;

pub use kube_client::{virtual_service_from_dynamic, KubeCluster};
pub use pods::{instance_type, is_pod_ready, is_pod_spec_latest, is_worker_node};

use crate::error::Result;
use crate::models::VirtualService;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v1::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};

/// Label carrying the owning API name on deployments, pods and virtual services
pub const API_NAME_LABEL: &str = "apiName";
/// Label marking nodes that run API workloads
pub const WORKLOAD_LABEL: &str = "workload";
pub const INSTANCE_TYPE_LABEL: &str = "beta.kubernetes.io/instance-type";
/// Pod status reason set by the kubelet on eviction
pub const REASON_EVICTED: &str = "Evicted";

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Ingress routing objects in the API namespace
    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>>;

    /// Create or overwrite a config map
    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<()>;

    /// Deployments that carry the given label key
    async fn list_deployments_with_label(&self, label: &str) -> Result<Vec<Deployment>>;

    /// Pods that carry the given label key
    async fn list_pods_with_label(&self, label: &str) -> Result<Vec<Pod>>;

    /// Pods in the Failed phase
    async fn list_failed_pods(&self) -> Result<Vec<Pod>>;

    async fn delete_pod(&self, name: &str) -> Result<()>;

    async fn hpa_exists(&self, name: &str) -> Result<bool>;

    async fn create_hpa(&self, hpa: HorizontalPodAutoscaler) -> Result<()>;
}
