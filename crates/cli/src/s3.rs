//! [`ObjectStore`] backed by the AWS S3 SDK

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use operator_lib::storage::{ObjectStore, S3Path};
use operator_lib::{Error, Result};
use tracing::debug;

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the standard AWS credential chain
    ///
    /// A custom endpoint switches to path-style addressing, which most
    /// S3-compatible stores require.
    pub async fn from_env(region: Option<String>, endpoint: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.is_some())
            .build();

        Self::new(Client::from_conf(s3_config))
    }
}

fn store_error(path: impl std::fmt::Display, err: impl std::error::Error) -> Error {
    Error::object_store(format!("{}: {}", path, DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn is_file(&self, path: &S3Path) -> Result<bool> {
        let outcome = self
            .client
            .head_object()
            .bucket(&path.bucket)
            .key(&path.key)
            .send()
            .await;

        match outcome {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) => {
                Ok(false)
            }
            Err(e) => Err(store_error(path, e)),
        }
    }

    async fn is_prefix(&self, path: &S3Path) -> Result<bool> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&path.bucket)
            .prefix(&path.key)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| store_error(path, e))?;

        Ok(!output.contents().is_empty())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| store_error(S3Path::new(bucket, prefix), e))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }

        debug!(bucket, prefix, count = keys.len(), "Listed object keys");
        Ok(keys)
    }
}
