//! Predictor artifact probing
//!
//! Confirms that model artifacts in object storage have the layout each
//! predictor type expects. TensorFlow exports may point at a parent
//! directory of numeric version directories, in which case the highest valid
//! version is selected.

use crate::error::{ErrorKind, Result};
use crate::storage::{ObjectStore, S3Path};
use std::sync::Arc;
use tracing::{debug, warn};

const SAVED_MODEL: &str = "saved_model.pb";
const VARIABLES_INDEX: &str = "variables/variables.index";
const VARIABLES_DATA_PREFIX: &str = "variables/variables.data-00000-of";

pub struct ArtifactProber {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactProber {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Check a TensorFlow model and return the path that should be served
    ///
    /// A `.zip` model must exist as a single object and is returned as-is.
    /// Otherwise the path must be a valid export directory or contain one as
    /// a numeric version subdirectory.
    pub async fn probe_tensorflow(&self, model: &str) -> Result<String> {
        let path = S3Path::parse(model).map_err(ErrorKind::InvalidString)?;

        if model.ends_with(".zip") {
            return match self.store.is_file(&path).await {
                Ok(true) => Ok(model.to_string()),
                _ => Err(ErrorKind::S3FileNotFound(model.to_string()).into()),
            };
        }

        match self.resolve_tensorflow_export(&path).await {
            Some(resolved) => {
                debug!(model = %model, resolved = %resolved, "Resolved tensorflow export");
                Ok(resolved.to_string())
            }
            None => Err(ErrorKind::InvalidTensorFlowDir(model.to_string()).into()),
        }
    }

    /// Check that an ONNX model exists as a single object
    pub async fn probe_onnx(&self, model: &str) -> Result<()> {
        let path = S3Path::parse(model).map_err(ErrorKind::InvalidString)?;

        match self.store.is_file(&path).await {
            Ok(true) => Ok(()),
            _ => Err(ErrorKind::S3FileNotFound(model.to_string()).into()),
        }
    }

    /// Find the export directory to serve for a TensorFlow model path
    pub async fn resolve_tensorflow_export(&self, path: &S3Path) -> Option<S3Path> {
        if self.is_valid_tensorflow_dir(path).await {
            return Some(path.clone());
        }

        let prefix = path.dir_prefix();
        let keys = match self.store.list_keys(&path.bucket, &prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to list tensorflow export candidates");
                Vec::new()
            }
        };

        let mut best: Option<(i64, S3Path)> = None;
        for key in &keys {
            let Some(dir) = key.strip_suffix(&format!("/{}", SAVED_MODEL)) else {
                continue;
            };
            let Some(child) = dir.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if child.is_empty() || child.contains('/') {
                continue;
            }

            let version = parse_version(child);
            if matches!(&best, Some((highest, _)) if version < *highest) {
                continue;
            }

            let candidate = S3Path::new(path.bucket.clone(), dir);
            if self.is_valid_tensorflow_dir(&candidate).await {
                best = Some((version, candidate));
            }
        }

        best.map(|(_, path)| path)
    }

    /// An export directory holds saved_model.pb, variables/variables.index
    /// and at least one variables/variables.data-00000-of-* shard
    pub async fn is_valid_tensorflow_dir(&self, dir: &S3Path) -> bool {
        let required = [dir.join(SAVED_MODEL), dir.join(VARIABLES_INDEX)];
        match self.store.are_files(&required).await {
            Ok(true) => {}
            _ => return false,
        }

        matches!(
            self.store.is_prefix(&dir.join(VARIABLES_DATA_PREFIX)).await,
            Ok(true)
        )
    }
}

/// Non-negative integer directory names are versions; anything else is 0
fn parse_version(component: &str) -> i64 {
    component
        .parse::<i64>()
        .ok()
        .filter(|v| *v >= 0)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeObjectStore;

    fn setup(keys: &[&str]) -> (ArtifactProber, Arc<FakeObjectStore>) {
        let store = Arc::new(FakeObjectStore::with_keys("b", keys));
        (ArtifactProber::new(store.clone()), store)
    }

    fn export(dir: &str) -> Vec<String> {
        vec![
            format!("{}/saved_model.pb", dir),
            format!("{}/variables/variables.index", dir),
            format!("{}/variables/variables.data-00000-of-00001", dir),
        ]
    }

    #[tokio::test]
    async fn test_direct_export_directory() {
        let keys = export("m");
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (prober, _) = setup(&keys);

        assert_eq!(prober.probe_tensorflow("s3://b/m").await.unwrap(), "s3://b/m");
    }

    #[tokio::test]
    async fn test_skips_incomplete_higher_version() {
        let (prober, _) = setup(&[
            "m/1/saved_model.pb",
            "m/1/variables/variables.index",
            "m/1/variables/variables.data-00000-of-00001",
            "m/2/saved_model.pb",
        ]);

        assert_eq!(prober.probe_tensorflow("s3://b/m/").await.unwrap(), "s3://b/m/1");
    }

    #[tokio::test]
    async fn test_selects_highest_numeric_version() {
        let mut keys = Vec::new();
        for v in ["9", "10", "2"] {
            keys.extend(export(&format!("m/{}", v)));
        }
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (prober, _) = setup(&keys);

        assert_eq!(prober.probe_tensorflow("s3://b/m").await.unwrap(), "s3://b/m/10");
    }

    #[tokio::test]
    async fn test_non_numeric_child_counts_as_version_zero() {
        let mut keys = export("m/latest");
        keys.extend(export("m/3"));
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (prober, _) = setup(&keys);
        assert_eq!(prober.probe_tensorflow("s3://b/m").await.unwrap(), "s3://b/m/3");

        let keys = export("m/latest");
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (prober, _) = setup(&keys);
        assert_eq!(prober.probe_tensorflow("s3://b/m").await.unwrap(), "s3://b/m/latest");
    }

    #[tokio::test]
    async fn test_equal_versions_last_listed_wins() {
        let mut keys = export("m/01");
        keys.extend(export("m/1"));
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (prober, _) = setup(&keys);

        assert_eq!(prober.probe_tensorflow("s3://b/m").await.unwrap(), "s3://b/m/1");
    }

    #[tokio::test]
    async fn test_nested_exports_are_not_candidates() {
        let keys = export("m/1/inner");
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (prober, _) = setup(&keys);

        let err = prober.probe_tensorflow("s3://b/m").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidTensorFlowDir(_)));
    }

    #[tokio::test]
    async fn test_listing_failure_is_invalid_dir() {
        let (prober, store) = setup(&[]);
        store.fail_listing();

        let err = prober.probe_tensorflow("s3://b/m").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidTensorFlowDir(_)));
    }

    #[tokio::test]
    async fn test_zip_must_exist() {
        let (prober, _) = setup(&["m.zip"]);
        assert_eq!(prober.probe_tensorflow("s3://b/m.zip").await.unwrap(), "s3://b/m.zip");

        let err = prober.probe_tensorflow("s3://b/other.zip").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::S3FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_onnx_file_check() {
        let (prober, _) = setup(&["model.onnx"]);
        assert!(prober.probe_onnx("s3://b/model.onnx").await.is_ok());

        let err = prober.probe_onnx("s3://b/missing.onnx").await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::S3FileNotFound(_)));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("17"), 17);
        assert_eq!(parse_version("-3"), 0);
        assert_eq!(parse_version("v2"), 0);
    }
}
