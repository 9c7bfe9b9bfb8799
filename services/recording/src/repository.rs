//! Persistence capability.
//!
//! Rows are mutated only through the transition-specific update methods.
//! Each update takes the version the caller read and fails with
//! [`RepositoryError::VersionMismatch`] if the row moved on in between, so
//! concurrent writers cannot silently overwrite each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::{
    AccessLog, Consent, GeoPoint, Recording, RecordingSettings, RecordingStats, RecordingStatus,
    RetentionPolicy,
};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Final media details written when an upload completes
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedUpload {
    pub file_url: String,
    pub file_size_bytes: i64,
    pub duration_seconds: i32,
    pub uploaded_at: DateTime<Utc>,
}

/// Chunked-transfer progress
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub upload_id: String,
    pub chunks_received: i32,
    pub chunks_total: i32,
}

#[async_trait]
pub trait RecordingRepository: Send + Sync {
    /// Insert a new row. Fails with `Conflict` when the ride already has a
    /// non-terminal recording by the same user.
    async fn create_recording(&self, recording: &Recording) -> RepositoryResult<()>;

    async fn get_recording(&self, id: Uuid) -> RepositoryResult<Recording>;

    /// The non-terminal recording for (ride, user), if any
    async fn get_active_recording(
        &self,
        ride_id: Uuid,
        user_id: Uuid,
    ) -> RepositoryResult<Option<Recording>>;

    async fn list_recordings_for_ride(&self, ride_id: Uuid) -> RepositoryResult<Vec<Recording>>;

    /// Recordings in any of the given statuses, oldest update first
    async fn list_recordings_by_status(
        &self,
        statuses: &[RecordingStatus],
        limit: i64,
    ) -> RepositoryResult<Vec<Recording>>;

    async fn update_recording_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: RecordingStatus,
    ) -> RepositoryResult<Recording>;

    /// Sets `ended_at`, duration and status `stopped`
    async fn update_recording_stopped(
        &self,
        id: Uuid,
        expected_version: i64,
        ended_at: DateTime<Utc>,
        duration_seconds: i32,
        end_location: Option<GeoPoint>,
    ) -> RepositoryResult<Recording>;

    /// Records chunk progress and sets status `uploading`
    async fn update_recording_upload(
        &self,
        id: Uuid,
        expected_version: i64,
        progress: &UploadProgress,
    ) -> RepositoryResult<Recording>;

    /// Persists final media details and sets status `uploaded`
    async fn update_recording_completed(
        &self,
        id: Uuid,
        expected_version: i64,
        upload: &CompletedUpload,
    ) -> RepositoryResult<Recording>;

    /// Marks post-processing done: status `completed`
    async fn update_recording_processed(
        &self,
        id: Uuid,
        expected_version: i64,
        thumbnail_url: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> RepositoryResult<Recording>;

    async fn update_retention_policy(
        &self,
        id: Uuid,
        expected_version: i64,
        policy: RetentionPolicy,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<Recording>;

    /// Sets status `deleted` and clears `file_url`. The row is kept.
    async fn mark_recording_deleted(
        &self,
        id: Uuid,
        expected_version: i64,
    ) -> RepositoryResult<Recording>;

    /// Rows past `expires_at` that are neither deleted nor failed
    async fn get_expired_recordings(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Recording>>;

    /// Insert or replace the (ride, user) consent row
    async fn upsert_consent(&self, consent: &Consent) -> RepositoryResult<Consent>;

    async fn list_consents(&self, ride_id: Uuid) -> RepositoryResult<Vec<Consent>>;

    /// True iff exactly two consent rows exist for the ride and both agree
    async fn check_all_consented(&self, ride_id: Uuid) -> RepositoryResult<bool>;

    async fn create_access_log(&self, entry: &AccessLog) -> RepositoryResult<()>;

    /// Newest first
    async fn list_access_logs(&self, recording_id: Uuid) -> RepositoryResult<Vec<AccessLog>>;

    async fn get_settings(&self, user_id: Uuid) -> RepositoryResult<Option<RecordingSettings>>;

    async fn upsert_settings(
        &self,
        settings: &RecordingSettings,
    ) -> RepositoryResult<RecordingSettings>;

    /// Aggregates over all recordings, or one recorder's when `user_id` is set
    async fn get_recording_stats(&self, user_id: Option<Uuid>) -> RepositoryResult<RecordingStats>;
}
