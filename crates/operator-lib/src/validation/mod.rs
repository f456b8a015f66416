//! API admission
//!
//! A validation pass runs in three stages:
//! 1. Manifest-wide checks (non-empty, unique names, unique endpoints)
//! 2. One capacity snapshot of the cluster
//! 3. Per-API predictor, compute and endpoint rules, in declaration order
//!
//! The pass stops at the first failure. Accepted APIs have their endpoint
//! defaulted and TensorFlow model paths resolved to the served version.

use crate::artifact::ArtifactProber;
use crate::capacity::CapacitySnapshotter;
use crate::cluster::ClusterClient;
use crate::config::OperatorConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::models::*;
use crate::observability::{OperatorMetrics, StructuredLogger};
use crate::schema::api_from_raw;
use crate::storage::ObjectStore;
use serde_yaml::Value as Yaml;
use std::sync::Arc;


pub struct ApiValidator {
    snapshotter: CapacitySnapshotter,
    prober: ArtifactProber,
    metrics: OperatorMetrics,
    logger: StructuredLogger,
}

impl ApiValidator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: Arc<dyn ObjectStore>,
        config: &OperatorConfig,
    ) -> Self {
        Self {
            snapshotter: CapacitySnapshotter::new(cluster, config.capacity()),
            prober: ArtifactProber::new(store),
            metrics: OperatorMetrics::new(),
            logger: StructuredLogger::new(config.namespace.clone()),
        }
    }

    pub fn snapshotter(&self) -> &CapacitySnapshotter {
        &self.snapshotter
    }

    /// Run a full validation pass, snapshotting the cluster once
    pub async fn validate(&self, apis: &mut [Api], files: &ProjectFiles) -> Result<()> {
        let outcome = self.run(apis, files).await;
        self.metrics.inc_validation_pass(outcome.is_ok());
        outcome
    }

    async fn run(&self, apis: &mut [Api], files: &ProjectFiles) -> Result<()> {
        check_manifest(apis)?;
        let snapshot = self.snapshotter.snapshot().await?;
        self.validate_each(apis, files, &snapshot).await
    }

    /// Validate against an already captured snapshot
    pub async fn validate_apis(
        &self,
        apis: &mut [Api],
        files: &ProjectFiles,
        snapshot: &CapacitySnapshot,
    ) -> Result<()> {
        check_manifest(apis)?;
        self.validate_each(apis, files, snapshot).await
    }

    /// Per-API checks in declaration order; manifest-level checks must already have passed
    async fn validate_each(
        &self,
        apis: &mut [Api],
        files: &ProjectFiles,
        snapshot: &CapacitySnapshot,
    ) -> Result<()> {
        for api in apis.iter_mut() {
            self.validate_api(api, files, snapshot).await?;
            self.logger.log_api_validated(
                &api.name,
                &api.effective_endpoint(),
                api.predictor.predictor_type.as_str(),
            );
        }
        Ok(())
    }

    async fn validate_api(
        &self,
        api: &mut Api,
        files: &ProjectFiles,
        snapshot: &CapacitySnapshot,
    ) -> Result<()> {
        if api.endpoint.is_none() {
            api.endpoint = Some(api.effective_endpoint());
        }
        let id = api.identify();

        self.validate_predictor(&mut api.predictor, files)
            .await
            .map_err(|e| e.wrap(PREDICTOR_KEY).wrap(&id))?;

        validate_compute(&api.compute, snapshot).map_err(|e| e.wrap(COMPUTE_KEY).wrap(&id))?;

        let endpoint = api.effective_endpoint();
        check_endpoint_collision(&api.name, &endpoint, snapshot)
            .map_err(|e| e.wrap_all([id.as_str(), ENDPOINT_KEY, endpoint.as_str()]))
    }

    async fn validate_predictor(&self, predictor: &mut Predictor, files: &ProjectFiles) -> Result<()> {
        let predictor_type = predictor.predictor_type.as_str();

        match predictor.predictor_type {
            PredictorType::Python => {
                if predictor.signature_key.is_some() {
                    return Err(not_supported(SIGNATURE_KEY_KEY, predictor_type));
                }
                if predictor.model.is_some() {
                    return Err(not_supported(MODEL_KEY, predictor_type));
                }
            }
            PredictorType::TensorFlow => {
                let model = predictor
                    .model
                    .as_deref()
                    .ok_or_else(|| required(MODEL_KEY, predictor_type))?;
                let resolved = self
                    .prober
                    .probe_tensorflow(model)
                    .await
                    .map_err(|e| e.wrap(MODEL_KEY))?;
                predictor.model = Some(resolved);
            }
            PredictorType::Onnx => {
                let model = predictor
                    .model
                    .as_deref()
                    .ok_or_else(|| required(MODEL_KEY, predictor_type))?;
                self.prober
                    .probe_onnx(model)
                    .await
                    .map_err(|e| e.wrap(MODEL_KEY))?;
                if predictor.signature_key.is_some() {
                    return Err(not_supported(SIGNATURE_KEY_KEY, predictor_type));
                }
            }
        }

        if !files.contains_key(&predictor.path) {
            return Err(Error::new(ErrorKind::ImplDoesNotExist(predictor.path.clone())).wrap(PATH_KEY));
        }

        if let Some(python_path) = &predictor.python_path {
            if !files.keys().any(|f| f.starts_with(python_path.as_str())) {
                return Err(Error::new(ErrorKind::ImplDoesNotExist(python_path.clone()))
                    .wrap(PYTHON_PATH_KEY));
            }
        }

        Ok(())
    }
}

fn required(field: &'static str, predictor_type: &'static str) -> Error {
    ErrorKind::FieldRequiredForPredictorType {
        field,
        predictor_type,
    }
    .into()
}

fn not_supported(field: &'static str, predictor_type: &'static str) -> Error {
    ErrorKind::FieldNotSupportedByPredictorType {
        field,
        predictor_type,
    }
    .into()
}

/// Checks that need the whole manifest: non-empty, unique names, unique endpoints
pub fn check_manifest(apis: &[Api]) -> Result<()> {
    if apis.is_empty() {
        return Err(ErrorKind::NoApis.into());
    }

    for api in apis {
        let same_name: Vec<String> = apis
            .iter()
            .filter(|other| other.name == api.name)
            .map(Api::identify)
            .collect();
        if same_name.len() > 1 {
            return Err(ErrorKind::DuplicateName {
                name: api.name.clone(),
                apis: same_name,
            }
            .into());
        }
    }

    for api in apis {
        let endpoint = api.effective_endpoint();
        let same_endpoint: Vec<String> = apis
            .iter()
            .filter(|other| other.effective_endpoint() == endpoint)
            .map(|other| other.name.clone())
            .collect();
        if same_endpoint.len() > 1 {
            return Err(ErrorKind::DuplicateEndpointSameDeployment {
                endpoint,
                apis: same_endpoint,
            }
            .into());
        }
    }

    Ok(())
}

/// Replica bounds and per-node capacity
pub fn validate_compute(compute: &Compute, snapshot: &CapacitySnapshot) -> Result<()> {
    if compute.min_replicas > compute.max_replicas {
        return Err(ErrorKind::MinReplicasGreaterThanMax {
            min: compute.min_replicas,
            max: compute.max_replicas,
        }
        .into());
    }
    if compute.init_replicas > compute.max_replicas {
        return Err(ErrorKind::InitReplicasGreaterThanMax {
            init: compute.init_replicas,
            max: compute.max_replicas,
        }
        .into());
    }
    if compute.init_replicas < compute.min_replicas {
        return Err(ErrorKind::InitReplicasLessThanMin {
            init: compute.init_replicas,
            min: compute.min_replicas,
        }
        .into());
    }

    if compute.cpu > snapshot.node_cpu {
        return Err(insufficient("CPU", &compute.cpu, &snapshot.node_cpu));
    }
    if let Some(mem) = &compute.mem {
        if *mem > snapshot.node_mem {
            return Err(insufficient("Memory", mem, &snapshot.node_mem));
        }
    }
    if compute.gpu > snapshot.node_gpu {
        return Err(insufficient("GPU", &compute.gpu, &snapshot.node_gpu));
    }

    Ok(())
}

fn insufficient(
    resource: &'static str,
    requested: &impl ToString,
    available: &impl ToString,
) -> Error {
    ErrorKind::InsufficientNodeCapacity {
        resource,
        requested: requested.to_string(),
        available: available.to_string(),
    }
    .into()
}

/// An endpoint may only be reused by the API that already serves it
pub fn check_endpoint_collision(
    api_name: &str,
    endpoint: &str,
    snapshot: &CapacitySnapshot,
) -> Result<()> {
    match snapshot
        .existing_endpoints
        .iter()
        .find(|e| e.endpoint == endpoint && e.api_name != api_name)
    {
        Some(existing) => Err(ErrorKind::DuplicateEndpointOtherDeployment {
            api: existing.api_name.clone(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Parse a manifest file into APIs and run a validation pass over them
///
/// The manifest must be a YAML sequence of mappings. Schema failures are
/// reported with the identity of the offending entry.
pub async fn extract_api_configs(
    bytes: &[u8],
    files: &ProjectFiles,
    file_path: &str,
    validator: &ApiValidator,
) -> Result<Vec<Api>> {
    let doc: Yaml = serde_yaml::from_slice(bytes)
        .map_err(|e| Error::new(ErrorKind::Yaml(e.to_string())).wrap(file_path))?;

    let entries = match doc {
        Yaml::Null => Vec::new(),
        Yaml::Sequence(entries) if entries.iter().all(Yaml::is_mapping) => entries,
        _ => return Err(Error::new(ErrorKind::MalformedConfig).wrap(file_path)),
    };
    if entries.is_empty() {
        return Err(Error::new(ErrorKind::NoApis).wrap(file_path));
    }

    let mut apis = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let name = entry.get(NAME_KEY).and_then(Yaml::as_str);
        let mut api = api_from_raw(entry).map_err(|errors| {
            let first = errors
                .into_iter()
                .next()
                .unwrap_or_else(|| Error::new(ErrorKind::MalformedConfig));
            first.wrap(identify(file_path, name, index))
        })?;
        api.index = index;
        api.file_path = file_path.to_string();
        apis.push(api);
    }

    validator.validate(&mut apis, files).await?;
    Ok(apis)
}
