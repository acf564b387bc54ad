//! S3-compatible blob store (AWS S3, MinIO).
//!
//! Credentials and the rest of the SDK configuration come from the standard
//! AWS environment; the bucket, region and an optional endpoint override come
//! from the `[blob]` config section. Path-style addressing is forced so that
//! MinIO endpoints work without virtual-host DNS.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use legora_shared::{BlobConfig, LegoraError, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt::Debug;
use tracing::debug;

use super::BlobStore;

/// Bytes escaped in a `CopySource` header: everything but unreserved
/// characters and the `/` separating key segments.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// S3-based blob store bound to one bucket.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl Debug for S3BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl S3BlobStore {
    /// Build a client from the environment plus the `[blob]` section.
    pub async fn from_config(config: &BlobConfig) -> Result<Self> {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(true);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }
}

/// URL-encoded `bucket/key` for `CopyObject`.
fn copy_source(bucket: &str, key: &str) -> String {
    utf8_percent_encode(&format!("{bucket}/{key}"), COPY_SOURCE).to_string()
}

/// Map an SDK error, turning HTTP 404 into [`LegoraError::BlobNotFound`].
fn map_s3_error<E>(err: SdkError<E, HttpResponse>, key: &str) -> LegoraError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let SdkError::ServiceError(service_err) = &err {
        if service_err.raw().status().as_u16() == 404 {
            return LegoraError::BlobNotFound {
                key: key.to_string(),
            };
        }
    }
    LegoraError::blob(key, DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(copy_source(&self.bucket, src_key))
            .bucket(&self.bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| map_s3_error(e, src_key))?;
        debug!(bucket = %self.bucket, src_key, dst_key, "copied object");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_s3_error(e, key))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| LegoraError::blob(key, format!("failed to read body: {e}")))?
            .into_bytes()
            .to_vec();
        Ok(bytes)
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| map_s3_error(e, key))?;
        Ok(())
    }
}
