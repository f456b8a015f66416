//! Core data models for API deployment admission

use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Project-relative file path to file contents, frozen for one validation pass
pub type ProjectFiles = BTreeMap<String, Vec<u8>>;

pub const NAME_KEY: &str = "name";
pub const ENDPOINT_KEY: &str = "endpoint";
pub const TRACKER_KEY: &str = "tracker";
pub const PREDICTOR_KEY: &str = "predictor";
pub const COMPUTE_KEY: &str = "compute";
pub const TYPE_KEY: &str = "type";
pub const PATH_KEY: &str = "path";
pub const MODEL_KEY: &str = "model";
pub const PYTHON_PATH_KEY: &str = "pythonPath";
pub const SIGNATURE_KEY_KEY: &str = "signatureKey";

/// Predictor variant; selects artifact probe rules and permitted fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictorType {
    Python,
    TensorFlow,
    Onnx,
}

impl PredictorType {
    pub const ALL: &'static [&'static str] = &["python", "tensorflow", "onnx"];

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictorType::Python => "python",
            PredictorType::TensorFlow => "tensorflow",
            PredictorType::Onnx => "onnx",
        }
    }
}

impl fmt::Display for PredictorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Classification,
    Regression,
    #[serde(rename = "")]
    Unknown,
}

impl ModelType {
    pub const ALL: &'static [&'static str] = &["classification", "regression", ""];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracker {
    pub key: Option<String>,
    pub model_type: ModelType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predictor {
    #[serde(rename = "type")]
    pub predictor_type: PredictorType,
    pub path: String,
    pub model: Option<String>,
    pub python_path: Option<String>,
    pub config: serde_json::Map<String, serde_json::Value>,
    pub env: BTreeMap<String, String>,
    pub signature_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compute {
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub init_replicas: i32,
    #[serde(rename = "targetCPUUtilization")]
    pub target_cpu_utilization: i32,
    pub cpu: Quantity,
    pub mem: Option<Quantity>,
    pub gpu: i64,
}

/// A deployment intent; frozen once validation accepts it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Api {
    pub name: String,
    pub endpoint: Option<String>,
    pub tracker: Option<Tracker>,
    pub predictor: Predictor,
    pub compute: Compute,
    #[serde(skip)]
    pub index: usize,
    #[serde(skip)]
    pub file_path: String,
}

impl Api {
    /// Diagnostic identity used as the outer key of error paths
    pub fn identify(&self) -> String {
        identify(&self.file_path, Some(&self.name), self.index)
    }

    /// Endpoint as served: explicit, or "/" + name
    pub fn effective_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("/{}", self.name))
    }
}

/// Render "file: api: name", or "file: api at index i" when the name is unknown
pub fn identify(file_path: &str, name: Option<&str>, index: usize) -> String {
    match name {
        Some(name) if !name.is_empty() => format!("{}: api: {}", file_path, name),
        _ => format!("{}: api at index {}", file_path, index),
    }
}

/// Routing object from the ingress layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualService {
    pub name: String,
    pub gateways: Vec<String>,
    pub endpoints: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// An endpoint currently served on the API gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingEndpoint {
    pub endpoint: String,
    pub api_name: String,
}

/// Cluster facts captured once per validation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySnapshot {
    /// Per-node CPU after reservations
    pub node_cpu: Quantity,
    /// Per-node memory after reservations
    pub node_mem: Quantity,
    pub node_gpu: i64,
    pub existing_endpoints: Vec<ExistingEndpoint>,
}
