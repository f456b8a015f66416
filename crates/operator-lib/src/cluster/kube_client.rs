//! [`ClusterClient`] backed by kube-rs

use super::ClusterClient;
use crate::error::Result;
use crate::models::VirtualService;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v1::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::Value;
use tracing::debug;

const FIELD_MANAGER: &str = "inference-operator";

/// Kubernetes access scoped to the namespace APIs are deployed in
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Build a client from in-cluster config or the local kubeconfig
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn hpas(&self) -> Api<HorizontalPodAutoscaler> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn virtual_services(&self) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("networking.istio.io", "v1alpha3", "VirtualService");
        let resource = ApiResource::from_gvk(&gvk);
        Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == code)
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_virtual_services(&self) -> Result<Vec<VirtualService>> {
        let list = self.virtual_services().list(&ListParams::default()).await?;
        Ok(list.items.iter().map(virtual_service_from_dynamic).collect())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.list(&ListParams::default()).await?.items)
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_maps().get_opt(name).await?)
    }

    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<()> {
        let name = config_map.name_any();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.config_maps()
            .patch(&name, &params, &Patch::Apply(&config_map))
            .await?;
        debug!(config_map = %name, "Applied config map");
        Ok(())
    }

    async fn list_deployments_with_label(&self, label: &str) -> Result<Vec<Deployment>> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = ListParams::default().labels(label);
        Ok(deployments.list(&params).await?.items)
    }

    async fn list_pods_with_label(&self, label: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(label);
        Ok(self.pods().list(&params).await?.items)
    }

    async fn list_failed_pods(&self) -> Result<Vec<Pod>> {
        let params = ListParams::default().fields("status.phase=Failed");
        Ok(self.pods().list(&params).await?.items)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        match self.pods().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn hpa_exists(&self, name: &str) -> Result<bool> {
        Ok(self.hpas().get_opt(name).await?.is_some())
    }

    async fn create_hpa(&self, hpa: HorizontalPodAutoscaler) -> Result<()> {
        match self.hpas().create(&PostParams::default(), &hpa).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Extract gateways, served endpoints and labels from an Istio VirtualService
pub fn virtual_service_from_dynamic(obj: &DynamicObject) -> VirtualService {
    let spec = obj.data.get("spec");

    let gateways = spec
        .and_then(|s| s.get("gateways"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut endpoints: Vec<String> = Vec::new();
    let routes = spec
        .and_then(|s| s.get("http"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    for route in routes {
        let matches = route.get("match").and_then(Value::as_array).into_iter().flatten();
        for m in matches {
            for kind in ["exact", "prefix"] {
                if let Some(endpoint) = m.get("uri").and_then(|u| u.get(kind)).and_then(Value::as_str) {
                    if !endpoints.iter().any(|e| e == endpoint) {
                        endpoints.push(endpoint.to_string());
                    }
                }
            }
        }
    }

    VirtualService {
        name: obj.name_any(),
        gateways,
        endpoints,
        labels: obj.labels().clone(),
    }
}
