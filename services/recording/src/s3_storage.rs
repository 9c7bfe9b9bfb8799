use crate::config::S3Config;
use crate::error::StorageError;
use crate::storage::{ObjectStorage, ObjectStream, PresignedDownload, PresignedUpload, UploadedObject};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::Utc;
use futures::stream;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// S3-backed object storage for recording media
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    region: String,
    public_base_url: Option<String>,
}

impl S3Storage {
    /// Create a new S3 storage client
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 storage initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }

    fn presigning_config(ttl: Duration) -> Result<PresigningConfig, StorageError> {
        PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Presign(e.to_string()))
    }
}

/// Public URL for an object, preferring a configured base URL
fn public_url(base_url: Option<&str>, bucket: &str, region: &str, key: &str) -> String {
    match base_url {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
    }
}

fn expiry_after(ttl: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1))
}

#[async_trait]
impl ObjectStorage for S3Storage {
    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<UploadedObject, StorageError> {
        let size = body.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("put_object failed: {e}")))?;

        debug!(key = %key, size_bytes = size, "Object uploaded");

        Ok(UploadedObject {
            key: key.to_string(),
            url: self.get_url(key),
            size,
            mime_type: content_type.to_string(),
            uploaded_at: Utc::now(),
        })
    }

    #[instrument(skip(self))]
    async fn download(&self, key: &str) -> Result<ObjectStream, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(format!("get_object failed: {e}"))
                }
            })?;

        let body = stream::unfold(response.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), body)),
                Ok(None) => None,
                Err(e) => Some((Err(StorageError::Backend(e.to_string())), body)),
            }
        });

        Ok(Box::pin(body))
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("delete_object failed: {e}")))?;

        debug!(key = %key, "Object deleted");
        Ok(())
    }

    fn get_url(&self, key: &str) -> String {
        public_url(self.public_base_url.as_deref(), &self.bucket, &self.region, key)
    }

    #[instrument(skip(self))]
    async fn presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<PresignedUpload, StorageError> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(Self::presigning_config(ttl)?)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        let headers: HashMap<String, String> = presigned
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        Ok(PresignedUpload {
            url: presigned.uri().to_string(),
            method: presigned.method().to_string(),
            headers,
            expires_at: expiry_after(ttl),
        })
    }

    #[instrument(skip(self))]
    async fn presigned_download_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedDownload, StorageError> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presigning_config(ttl)?)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        Ok(PresignedDownload {
            url: presigned.uri().to_string(),
            expires_at: expiry_after(ttl),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StorageError::Backend(format!("head_object failed: {e}")))
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn copy(&self, source_key: &str, destination_key: &str) -> Result<(), StorageError> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, source_key))
            .key(destination_key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("copy_object failed: {e}")))?;

        debug!(source = %source_key, destination = %destination_key, "Object copied");
        Ok(())
    }
}
