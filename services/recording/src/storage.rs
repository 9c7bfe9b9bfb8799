//! Object storage capability.
//!
//! Recording media never flows through this service: clients upload and
//! download directly against the blob store through presigned URLs. The
//! service only derives keys, issues URLs and removes objects.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::StorageError;

/// Streamed object body
pub type ObjectStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Result of a direct upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadedObject {
    pub key: String,
    pub url: String,
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Presigned request a client uses to upload straight to the bucket
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUpload {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

/// Presigned GET for media playback
#[derive(Debug, Clone, Serialize)]
pub struct PresignedDownload {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<UploadedObject, StorageError>;

    async fn download(&self, key: &str) -> Result<ObjectStream, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Resolve the object's public URL. Pure string work, never fails.
    fn get_url(&self, key: &str) -> String;

    async fn presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<PresignedUpload, StorageError>;

    async fn presigned_download_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedDownload, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn copy(&self, source_key: &str, destination_key: &str) -> Result<(), StorageError>;
}

/// File extension for a recording type. Anything other than video is
/// stored as m4a.
pub fn extension_for(recording_type: &str) -> &'static str {
    if recording_type.eq_ignore_ascii_case("video") {
        "mp4"
    } else {
        "m4a"
    }
}

/// Object key for a recording.
/// Format: recordings/{ride_id}/{recorder_user_id}/{recording_id}.{ext}
///
/// Delete and URL resolution rebuild this key from the stored row, so the
/// format must stay stable.
pub fn object_key(ride_id: Uuid, user_id: Uuid, recording_id: Uuid, recording_type: &str) -> String {
    format!(
        "recordings/{ride_id}/{user_id}/{recording_id}.{ext}",
        ext = extension_for(recording_type)
    )
}
