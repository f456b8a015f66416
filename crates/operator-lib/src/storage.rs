//! Object storage capability
//!
//! Paths are `s3://<bucket>/<key>`; joining and splitting are by '/', and
//! listing is prefix-based.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3Path {
    pub bucket: String,
    pub key: String,
}

impl S3Path {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn parse(path: &str) -> std::result::Result<Self, String> {
        let rest = path
            .strip_prefix("s3://")
            .ok_or_else(|| format!("{}: s3 path must start with s3://", path))?;

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(format!("{}: s3 path is missing a bucket", path));
        }

        Ok(Self::new(bucket, key))
    }

    /// Append path components, normalizing the separator between them
    pub fn join(&self, suffix: &str) -> S3Path {
        let base = self.key.trim_end_matches('/');
        let suffix = suffix.trim_start_matches('/');
        let key = if base.is_empty() {
            suffix.to_string()
        } else {
            format!("{}/{}", base, suffix)
        };
        S3Path::new(self.bucket.clone(), key)
    }

    /// The key as a directory prefix ending in '/'
    pub fn dir_prefix(&self) -> String {
        let base = self.key.trim_end_matches('/');
        if base.is_empty() {
            String::new()
        } else {
            format!("{}/", base)
        }
    }
}

impl fmt::Display for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Read-only view of object storage used by the artifact prober
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// True when exactly this key exists as an object
    async fn is_file(&self, path: &S3Path) -> Result<bool>;

    /// True when at least one key starts with this path
    async fn is_prefix(&self, path: &S3Path) -> Result<bool>;

    /// All keys under a prefix
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// True when every path exists as an object
    async fn are_files(&self, paths: &[S3Path]) -> Result<bool> {
        for path in paths {
            if !self.is_file(path).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let p = S3Path::parse("s3://bucket/models/iris/1").unwrap();
        assert_eq!(p.bucket, "bucket");
        assert_eq!(p.key, "models/iris/1");

        let p = S3Path::parse("s3://bucket").unwrap();
        assert_eq!(p.key, "");

        assert!(S3Path::parse("bucket/key").is_err());
        assert!(S3Path::parse("s3:///key").is_err());
    }

    #[test]
    fn test_join_normalizes_separators() {
        let p = S3Path::parse("s3://b/m/").unwrap();
        assert_eq!(p.join("saved_model.pb").to_string(), "s3://b/m/saved_model.pb");
        assert_eq!(p.join("/1").to_string(), "s3://b/m/1");

        let root = S3Path::new("b", "");
        assert_eq!(root.join("x").key, "x");
    }

    #[test]
    fn test_dir_prefix() {
        assert_eq!(S3Path::new("b", "m").dir_prefix(), "m/");
        assert_eq!(S3Path::new("b", "m/").dir_prefix(), "m/");
        assert_eq!(S3Path::new("b", "").dir_prefix(), "");
    }
}
