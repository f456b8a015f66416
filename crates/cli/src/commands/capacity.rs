//! Per-node capacity and served endpoints, as admission sees them

use anyhow::{Context, Result};
use operator_lib::capacity::CapacitySnapshotter;
use operator_lib::{CapacitySnapshot, OperatorConfig};
use std::sync::Arc;
use tabled::Tabled;

use crate::output::{print_info, print_rows, render_table, OutputFormat};

/// Row for capacity table
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: &'static str,
    #[tabled(rename = "Available per node")]
    available: String,
}

/// Row for endpoints table
#[derive(Tabled)]
struct EndpointRow {
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "API")]
    api: String,
}

fn resource_rows(snapshot: &CapacitySnapshot) -> Vec<ResourceRow> {
    vec![
        ResourceRow {
            resource: "CPU",
            available: snapshot.node_cpu.to_string(),
        },
        ResourceRow {
            resource: "Memory",
            available: snapshot.node_mem.to_string(),
        },
        ResourceRow {
            resource: "GPU",
            available: snapshot.node_gpu.to_string(),
        },
    ]
}

fn endpoint_rows(snapshot: &CapacitySnapshot) -> Vec<EndpointRow> {
    snapshot
        .existing_endpoints
        .iter()
        .map(|e| EndpointRow {
            endpoint: e.endpoint.clone(),
            api: e.api_name.clone(),
        })
        .collect()
}

pub async fn run(config: &OperatorConfig, kubeconfig: Option<&str>, format: OutputFormat) -> Result<()> {
    let cluster = super::connect(kubeconfig, &config.namespace).await?;
    let snapshotter = CapacitySnapshotter::new(Arc::new(cluster), config.capacity());
    let snapshot = snapshotter
        .snapshot()
        .await
        .context("Failed to snapshot cluster capacity")?;

    print_rows(&resource_rows(&snapshot), &snapshot, format)?;

    if matches!(format, OutputFormat::Table) {
        let endpoints = endpoint_rows(&snapshot);
        if endpoints.is_empty() {
            print_info(&format!("No endpoints served on gateway {}", config.api_gateway));
        } else {
            println!("{}", render_table(&endpoints));
        }
    }
    Ok(())
}
