//! Admission and reconciliation for model-serving API deployments
//!
//! This crate provides:
//! - Manifest schema validation and API admission against cluster capacity
//! - Model artifact probing in object storage
//! - Periodic reconciliation (evicted pods, autoscaler installation)
//! - Instance telemetry, health checks and observability

pub mod artifact;
pub mod capacity;
pub mod cluster;
pub mod config;
pub mod cron;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod parallel;
pub mod quantity;
pub mod reconciler;
pub mod schema;
pub mod storage;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
pub(crate) mod fakes;

pub use config::OperatorConfig;
pub use error::{Error, ErrorKind, Result};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{OperatorMetrics, StructuredLogger};
pub use validation::{extract_api_configs, ApiValidator};
