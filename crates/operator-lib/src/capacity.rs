//! Capacity snapshotting
//!
//! A snapshot freezes two cluster facts for one validation pass: the
//! endpoints already served on the API gateway, and the per-node resources
//! left for API workloads after fixed reservations. Both are fetched
//! concurrently.

use crate::cluster::{is_worker_node, ClusterClient, API_NAME_LABEL};
use crate::config::{CapacityConfig, InstanceConfig, Reservations};
use crate::error::Result;
use crate::models::{CapacitySnapshot, ExistingEndpoint};
use crate::parallel::join_first_err;
use crate::quantity::Quantity;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Config map key holding the cached per-node memory
pub const MEMORY_CAPACITY_KEY: &str = "capacity";

pub struct CapacitySnapshotter {
    cluster: Arc<dyn ClusterClient>,
    config: CapacityConfig,
}

impl CapacitySnapshotter {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: CapacityConfig) -> Self {
        Self { cluster, config }
    }

    pub async fn snapshot(&self) -> Result<CapacitySnapshot> {
        let (existing_endpoints, node_mem) =
            join_first_err(self.existing_endpoints(), self.refresh_memory_capacity()).await?;

        let (node_cpu, node_mem, node_gpu) =
            reserve(&self.config.instance, &node_mem, &self.config.reservations);
        debug!(
            cpu = %node_cpu,
            mem = %node_mem,
            gpu = node_gpu,
            endpoints = existing_endpoints.len(),
            "Captured capacity snapshot"
        );

        Ok(CapacitySnapshot {
            node_cpu,
            node_mem,
            node_gpu,
            existing_endpoints,
        })
    }

    /// Endpoints routed through the API gateway, with their owning API
    pub async fn existing_endpoints(&self) -> Result<Vec<ExistingEndpoint>> {
        let services = self
            .cluster
            .list_virtual_services()
            .await
            .map_err(|e| e.wrap("list virtual services"))?;

        let mut endpoints = Vec::new();
        for vs in services {
            if !vs.gateways.iter().any(|g| *g == self.config.api_gateway) {
                continue;
            }
            let api_name = vs.labels.get(API_NAME_LABEL).cloned().unwrap_or_default();
            for endpoint in vs.endpoints {
                endpoints.push(ExistingEndpoint {
                    endpoint,
                    api_name: api_name.clone(),
                });
            }
        }
        Ok(endpoints)
    }

    /// Per-node memory before reservations
    ///
    /// Uses the smallest allocatable memory reported by a worker node and
    /// caches it in the memory config map when it changed. Without worker
    /// reports the cached value is used, then the configured instance memory.
    pub async fn refresh_memory_capacity(&self) -> Result<Quantity> {
        let name = &self.config.memory_config_map;
        let nodes = self
            .cluster
            .list_nodes()
            .await
            .map_err(|e| e.wrap("list nodes"))?;
        let cached = self
            .cluster
            .get_config_map(name)
            .await
            .map_err(|e| e.wrap(format!("read config map {}", name)))?
            .as_ref()
            .and_then(cached_memory);

        let Some(observed) = min_worker_memory(&nodes) else {
            return Ok(cached.unwrap_or_else(|| self.config.instance.mem.clone()));
        };

        if cached.as_ref() != Some(&observed) {
            self.cluster
                .apply_config_map(memory_config_map(name, &observed))
                .await
                .map_err(|e| e.wrap(format!("write config map {}", name)))?;
            info!(
                event = "memory_capacity_updated",
                previous = ?cached.map(|q| q.to_string()),
                current = %observed,
                "Updated cached node memory capacity"
            );
        }
        Ok(observed)
    }
}

/// Subtract fixed overheads from instance resources
///
/// Nodes with GPUs also run the device plugin, which has its own reservation.
pub fn reserve(
    instance: &InstanceConfig,
    mem: &Quantity,
    reservations: &Reservations,
) -> (Quantity, Quantity, i64) {
    let mut cpu = instance.cpu.saturating_sub(&reservations.cpu);
    let mut mem = mem.saturating_sub(&reservations.mem);
    if instance.gpu > 0 {
        cpu = cpu.saturating_sub(&reservations.device_plugin_cpu);
        mem = mem.saturating_sub(&reservations.device_plugin_mem);
    }
    (cpu, mem, instance.gpu)
}

fn min_worker_memory(nodes: &[Node]) -> Option<Quantity> {
    nodes
        .iter()
        .filter(|n| is_worker_node(n))
        .filter_map(|n| {
            let raw = n.status.as_ref()?.allocatable.as_ref()?.get("memory")?;
            match Quantity::try_from(raw) {
                Ok(q) => Some(q),
                Err(e) => {
                    warn!(error = %e, "Ignoring unparsable node memory");
                    None
                }
            }
        })
        .min()
}

fn cached_memory(cm: &ConfigMap) -> Option<Quantity> {
    let raw = cm.data.as_ref()?.get(MEMORY_CAPACITY_KEY)?;
    Quantity::parse(raw).ok()
}

fn memory_config_map(name: &str, mem: &Quantity) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        data: Some([(MEMORY_CAPACITY_KEY.to_string(), mem.to_string())].into()),
        ..Default::default()
    }
}
