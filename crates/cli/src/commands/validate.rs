//! Manifest validation against the live cluster and object storage

use anyhow::{Context, Result};
use clap::Args;
use operator_lib::{extract_api_configs, Api, ApiValidator, OperatorConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::Tabled;
use tracing::info;

use crate::output::{or_dash, print_rows, print_success, OutputFormat};
use crate::project::read_project;
use crate::s3::S3ObjectStore;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the API manifest
    pub manifest: PathBuf,

    /// Project directory holding predictor code (defaults to the manifest's directory)
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// AWS region for model artifacts
    #[arg(long, env = "AWS_REGION")]
    pub s3_region: Option<String>,

    /// Custom S3-compatible endpoint
    #[arg(long, env = "INFCTL_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,
}

/// Row for accepted APIs table
#[derive(Tabled)]
struct ApiRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Predictor")]
    predictor: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Replicas")]
    replicas: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Mem")]
    mem: String,
    #[tabled(rename = "GPU")]
    gpu: i64,
}

fn api_rows(apis: &[Api]) -> Vec<ApiRow> {
    apis.iter()
        .map(|api| ApiRow {
            name: api.name.clone(),
            endpoint: api.effective_endpoint(),
            predictor: api.predictor.predictor_type.to_string(),
            model: or_dash(api.predictor.model.as_deref()),
            replicas: format!(
                "{}..{} (init {})",
                api.compute.min_replicas, api.compute.max_replicas, api.compute.init_replicas
            ),
            cpu: api.compute.cpu.to_string(),
            mem: or_dash(api.compute.mem.as_ref()),
            gpu: api.compute.gpu,
        })
        .collect()
}

/// Name the manifest is reported under in diagnostics
fn manifest_name(manifest: &Path) -> String {
    manifest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| manifest.display().to_string())
}

fn project_root(args: &ValidateArgs) -> PathBuf {
    match &args.project_dir {
        Some(dir) => dir.clone(),
        None => args
            .manifest
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

pub async fn run(
    args: ValidateArgs,
    config: &OperatorConfig,
    kubeconfig: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let root = project_root(&args);
    let files = read_project(&root)?;
    let manifest = std::fs::read(&args.manifest)
        .with_context(|| format!("Failed to read manifest {}", args.manifest.display()))?;
    info!(project = %root.display(), files = files.len(), "Loaded project");

    let cluster = super::connect(kubeconfig, &config.namespace).await?;
    let store = S3ObjectStore::from_env(args.s3_region, args.s3_endpoint).await;
    let validator = ApiValidator::new(Arc::new(cluster), Arc::new(store), config);

    let apis = extract_api_configs(&manifest, &files, &manifest_name(&args.manifest), &validator).await?;

    print_rows(&api_rows(&apis), &apis, format)?;
    if matches!(format, OutputFormat::Table) {
        print_success(&format!("{} API(s) accepted", apis.len()));
    }
    Ok(())
}
