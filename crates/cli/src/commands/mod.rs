//! CLI subcommands

pub mod capacity;
pub mod validate;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use operator_lib::cluster::KubeCluster;

/// Connect to the cluster, preferring an explicit kubeconfig path
pub async fn connect(kubeconfig: Option<&str>, namespace: &str) -> Result<KubeCluster> {
    let client = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("Invalid kubeconfig")?;
            Client::try_from(config).context("Failed to create Kubernetes client")?
        }
        None => Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?,
    };

    Ok(KubeCluster::new(client, namespace))
}
