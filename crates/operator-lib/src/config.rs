//! Operator configuration
//!
//! Loaded once at process start from an optional YAML file (path in
//! `OPERATOR_CONFIG`) overlaid by `OPERATOR_*` environment variables, with
//! `__` separating nested keys (e.g. `OPERATOR_CRON__RECONCILE_INTERVAL_SECS`).

use crate::error::{Error, Result};
use crate::quantity::Quantity;
use serde::Deserialize;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "OPERATOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/operator/config.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Namespace APIs are deployed in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Port for health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Ingress gateway across which endpoints must be unique
    #[serde(default = "default_api_gateway")]
    pub api_gateway: String,

    #[serde(default)]
    pub cron: CronConfig,

    #[serde(default)]
    pub instance: InstanceConfig,

    #[serde(default)]
    pub reservations: Reservations,

    /// Config map caching observed per-node memory
    #[serde(default = "default_memory_config_map")]
    pub memory_config_map: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CronConfig {
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_secs: u64,

    /// Scrape interval of the metrics that drive autoscalers
    #[serde(default = "default_metrics_scrape_interval")]
    pub metrics_scrape_interval_secs: u64,

    #[serde(default = "default_dwell_margin")]
    pub dwell_margin_secs: u64,
}

/// Per-node resources of the worker instance type
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_instance_type")]
    pub instance_type: String,

    #[serde(default = "default_instance_cpu")]
    pub cpu: Quantity,

    #[serde(default = "default_instance_mem")]
    pub mem: Quantity,

    #[serde(default)]
    pub gpu: i64,
}

/// Per-node overheads subtracted before admitting API compute requests
#[derive(Debug, Clone, Deserialize)]
pub struct Reservations {
    #[serde(default = "default_reserved_cpu")]
    pub cpu: Quantity,

    #[serde(default = "default_reserved_mem")]
    pub mem: Quantity,

    /// Extra reservation for the GPU device plugin, applied when gpu > 0
    #[serde(default = "default_device_plugin_cpu")]
    pub device_plugin_cpu: Quantity,

    #[serde(default = "default_device_plugin_mem")]
    pub device_plugin_mem: Quantity,
}

/// Settings the capacity snapshotter needs
#[derive(Debug, Clone)]
pub struct CapacityConfig {
    pub api_gateway: String,
    pub instance: InstanceConfig,
    pub reservations: Reservations,
    pub memory_config_map: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_api_gateway() -> String {
    "apis-gateway".to_string()
}

fn default_memory_config_map() -> String {
    "instance-memory".to_string()
}

fn default_reconcile_interval() -> u64 {
    5
}

fn default_telemetry_interval() -> u64 {
    3600
}

fn default_metrics_scrape_interval() -> u64 {
    30
}

fn default_dwell_margin() -> u64 {
    5
}

fn default_instance_type() -> String {
    "unknown".to_string()
}

fn default_instance_cpu() -> Quantity {
    Quantity::from_units(2)
}

fn default_instance_mem() -> Quantity {
    Quantity::from_units(8 << 30)
}

fn default_reserved_cpu() -> Quantity {
    Quantity::from_millis(800)
}

fn default_reserved_mem() -> Quantity {
    Quantity::from_units(1500 << 20)
}

fn default_device_plugin_cpu() -> Quantity {
    Quantity::from_millis(100)
}

fn default_device_plugin_mem() -> Quantity {
    Quantity::from_units(100 << 20)
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            telemetry_interval_secs: default_telemetry_interval(),
            metrics_scrape_interval_secs: default_metrics_scrape_interval(),
            dwell_margin_secs: default_dwell_margin(),
        }
    }
}

impl CronConfig {
    /// Minimum age of a deployment's last progress before an autoscaler is installed
    pub fn dwell_time(&self) -> Duration {
        Duration::from_secs(self.metrics_scrape_interval_secs + self.dwell_margin_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_type: default_instance_type(),
            cpu: default_instance_cpu(),
            mem: default_instance_mem(),
            gpu: 0,
        }
    }
}

impl Default for Reservations {
    fn default() -> Self {
        Self {
            cpu: default_reserved_cpu(),
            mem: default_reserved_mem(),
            device_plugin_cpu: default_device_plugin_cpu(),
            device_plugin_mem: default_device_plugin_mem(),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            api_port: default_api_port(),
            api_gateway: default_api_gateway(),
            cron: CronConfig::default(),
            instance: InstanceConfig::default(),
            reservations: Reservations::default(),
            memory_config_map: default_memory_config_map(),
        }
    }
}

impl OperatorConfig {
    /// Load from the file named by `OPERATOR_CONFIG` (if present) and the environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Yaml).required(false))
            .add_source(
                config::Environment::with_prefix("OPERATOR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| Error::config(e.to_string()))
    }

    pub fn capacity(&self) -> CapacityConfig {
        CapacityConfig {
            api_gateway: self.api_gateway.clone(),
            instance: self.instance.clone(),
            reservations: self.reservations.clone(),
            memory_config_map: self.memory_config_map.clone(),
        }
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        OperatorConfig::default().capacity()
    }
}
