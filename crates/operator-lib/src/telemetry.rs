//! Telemetry sink and the instance telemetry probe
//!
//! The sink is where cron failures and periodic usage events go. The only
//! shipped implementation writes them to the structured log and counts
//! errors in Prometheus.

use crate::cluster::{instance_type, is_worker_node, ClusterClient};
use crate::error::{Error, Result};
use crate::observability::OperatorMetrics;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Event emitted by the instance telemetry probe
pub const INSTANCE_EVENT: &str = "operator.cron";

pub trait TelemetrySink: Send + Sync {
    fn event(&self, name: &str, properties: Value);

    fn error(&self, err: &Error);
}

/// Sink that records telemetry as tracing events
#[derive(Clone, Default)]
pub struct LogTelemetry {
    metrics: OperatorMetrics,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelemetrySink for LogTelemetry {
    fn event(&self, name: &str, properties: Value) {
        info!(event = "telemetry", name = %name, properties = %properties, "Telemetry event");
    }

    fn error(&self, err: &Error) {
        self.metrics.inc_telemetry_errors();
        warn!(event = "telemetry_error", error = %err, "Telemetry error");
    }
}

/// Count worker nodes by instance type and emit one event
pub async fn instance_telemetry(
    cluster: &dyn ClusterClient,
    sink: &dyn TelemetrySink,
) -> Result<()> {
    let nodes = cluster.list_nodes().await?;

    let mut instance_types: BTreeMap<String, u64> = BTreeMap::new();
    let mut instance_count = 0u64;
    for node in nodes.iter().filter(|n| is_worker_node(n)) {
        *instance_types.entry(instance_type(node)).or_default() += 1;
        instance_count += 1;
    }

    OperatorMetrics::new().set_worker_nodes(instance_count as i64);
    sink.event(
        INSTANCE_EVENT,
        json!({
            "instanceTypes": instance_types,
            "instanceCount": instance_count,
        }),
    );
    Ok(())
}
