//! S3 implementation of [`BlobClient`] on the AWS SDK.

use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Range;

use super::client::{BlobClient, ObjectInfo};
use crate::error::{BioIndexError, Result};

/// Blob client bound to one S3 bucket.
pub struct AwsBlobClient {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl AwsBlobClient {
    /// Create a client for a bucket using ambient AWS credentials.
    pub async fn new(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket: bucket.into(),
        }
    }

    /// Create a client from an existing SDK client.
    pub fn from_client(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobClient for AwsBlobClient {
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        if range.start >= range.end {
            return Ok(Bytes::new());
        }

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await
            .map_err(|e| BioIndexError::blob_read(key, e.to_string()))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| BioIndexError::blob_read(key, e.to_string()))?;

        Ok(data.into_bytes())
    }

    async fn head_object(&self, key: &str) -> Result<Option<u64>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => Ok(resp.content_length().map(|len| len as u64)),
            Err(e) => match e.as_service_error() {
                Some(svc) if svc.is_not_found() => Ok(None),
                _ => Err(BioIndexError::blob_read(key, e.to_string())),
            },
        }
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut paginator = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = paginator.next().await {
            let page = page.map_err(|e| BioIndexError::blob_read(prefix, e.to_string()))?;
            for object in page.contents() {
                if let (Some(key), Some(size)) = (object.key(), object.size()) {
                    objects.push(ObjectInfo {
                        key: key.to_string(),
                        size: size as u64,
                    });
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}
