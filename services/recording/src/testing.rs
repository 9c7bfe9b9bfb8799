//! In-memory fakes shared by unit tests

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::{RepositoryError, StorageError};
use crate::models::{
    AccessLog, Consent, GeoPoint, RecorderRole, Recording, RecordingSettings, RecordingStats,
    RecordingStatus, RecordingType, RetentionPolicy, StartRecordingRequest,
};
use crate::repository::{CompletedUpload, RecordingRepository, RepositoryResult, UploadProgress};
use crate::storage::{
    ObjectStorage, ObjectStream, PresignedDownload, PresignedUpload, UploadedObject,
};

fn injected() -> RepositoryError {
    RepositoryError::Database(sqlx::Error::PoolTimedOut)
}

/// A stopped-then-uploaded audio recording, ready for post-processing
pub fn sample_recording() -> Recording {
    let started_at = Utc::now() - ChronoDuration::minutes(10);
    let request = StartRecordingRequest {
        ride_id: Uuid::new_v4(),
        recording_type: "audio".to_string(),
        ..Default::default()
    };
    let mut recording = Recording::initialize(
        Uuid::new_v4(),
        RecorderRole::Rider,
        &request,
        RecordingType::Audio,
        started_at,
    );
    recording.status = RecordingStatus::Uploaded;
    recording.ended_at = Some(started_at + ChronoDuration::minutes(8));
    recording.duration_seconds = Some(480);
    recording.file_size_bytes = Some(3_840_000);
    recording.file_url = Some(format!("https://media.test/{}", recording.object_key()));
    recording.uploaded_at = Some(Utc::now());
    recording
}

#[derive(Default)]
struct RepositoryState {
    recordings: HashMap<Uuid, Recording>,
    consents: HashMap<(Uuid, Uuid), Consent>,
    access_logs: Vec<AccessLog>,
    settings: HashMap<Uuid, RecordingSettings>,
    mark_deleted_calls: Vec<Uuid>,
    fail_access_logs: bool,
    fail_reads: bool,
    hide_active: bool,
    failing_processed_updates: u32,
    failing_deletes: HashSet<Uuid>,
}

/// Repository backed by hash maps, with hooks for injecting failures
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<RepositoryState>,
}

impl MemoryRepository {
    pub fn insert(&self, recording: Recording) {
        self.state
            .lock()
            .unwrap()
            .recordings
            .insert(recording.id, recording);
    }

    pub fn recording(&self, id: Uuid) -> Option<Recording> {
        self.state.lock().unwrap().recordings.get(&id).cloned()
    }

    /// Overwrite the status without going through a transition
    pub fn force_status(&self, id: Uuid, status: RecordingStatus) {
        if let Some(recording) = self.state.lock().unwrap().recordings.get_mut(&id) {
            recording.status = status;
        }
    }

    pub fn backdate_start(&self, id: Uuid, by: ChronoDuration) {
        if let Some(recording) = self.state.lock().unwrap().recordings.get_mut(&id) {
            recording.started_at = recording.started_at - by;
        }
    }

    pub fn fail_access_logs(&self, fail: bool) {
        self.state.lock().unwrap().fail_access_logs = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    /// Makes the active-recording lookup miss, as a concurrent start would
    pub fn hide_active_recordings(&self, hide: bool) {
        self.state.lock().unwrap().hide_active = hide;
    }

    pub fn fail_next_processed_updates(&self, count: u32) {
        self.state.lock().unwrap().failing_processed_updates = count;
    }

    pub fn fail_mark_deleted_for(&self, id: Uuid) {
        self.state.lock().unwrap().failing_deletes.insert(id);
    }

    pub fn mark_deleted_calls(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().mark_deleted_calls.clone()
    }

    pub fn access_log_count(&self) -> usize {
        self.state.lock().unwrap().access_logs.len()
    }

    pub fn settings_count(&self) -> usize {
        self.state.lock().unwrap().settings.len()
    }

    fn update<F>(&self, id: Uuid, expected_version: i64, apply: F) -> RepositoryResult<Recording>
    where
        F: FnOnce(&mut Recording),
    {
        let mut state = self.state.lock().unwrap();
        let recording = state
            .recordings
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound("recording"))?;

        if recording.version != expected_version {
            return Err(RepositoryError::VersionMismatch(id));
        }

        apply(recording);
        recording.version += 1;
        recording.updated_at = Utc::now();
        Ok(recording.clone())
    }
}

#[async_trait]
impl RecordingRepository for MemoryRepository {
    async fn create_recording(&self, recording: &Recording) -> RepositoryResult<()> {
        let mut state = self.state.lock().unwrap();
        let clash = state.recordings.values().any(|r| {
            r.ride_id == recording.ride_id
                && r.user_id == recording.user_id
                && !r.status.is_terminal()
        });
        if clash {
            return Err(RepositoryError::Conflict(
                "an active recording already exists for this ride".to_string(),
            ));
        }

        state.recordings.insert(recording.id, recording.clone());
        Ok(())
    }

    async fn get_recording(&self, id: Uuid) -> RepositoryResult<Recording> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(injected());
        }

        state
            .recordings
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound("recording"))
    }

    async fn get_active_recording(
        &self,
        ride_id: Uuid,
        user_id: Uuid,
    ) -> RepositoryResult<Option<Recording>> {
        let state = self.state.lock().unwrap();
        if state.hide_active {
            return Ok(None);
        }
        Ok(state
            .recordings
            .values()
            .find(|r| r.ride_id == ride_id && r.user_id == user_id && !r.status.is_terminal())
            .cloned())
    }

    async fn list_recordings_for_ride(&self, ride_id: Uuid) -> RepositoryResult<Vec<Recording>> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .recordings
            .values()
            .filter(|r| r.ride_id == ride_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn list_recordings_by_status(
        &self,
        statuses: &[RecordingStatus],
        limit: i64,
    ) -> RepositoryResult<Vec<Recording>> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .recordings
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.updated_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn update_recording_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: RecordingStatus,
    ) -> RepositoryResult<Recording> {
        self.update(id, expected_version, |r| r.status = status)
    }

    async fn update_recording_stopped(
        &self,
        id: Uuid,
        expected_version: i64,
        ended_at: DateTime<Utc>,
        duration_seconds: i32,
        end_location: Option<GeoPoint>,
    ) -> RepositoryResult<Recording> {
        self.update(id, expected_version, |r| {
            r.status = RecordingStatus::Stopped;
            r.ended_at = Some(ended_at);
            r.duration_seconds = Some(duration_seconds);
            r.end_location = end_location;
        })
    }

    async fn update_recording_upload(
        &self,
        id: Uuid,
        expected_version: i64,
        progress: &UploadProgress,
    ) -> RepositoryResult<Recording> {
        self.update(id, expected_version, |r| {
            r.status = RecordingStatus::Uploading;
            r.upload_id = Some(progress.upload_id.clone());
            r.chunks_received = progress.chunks_received;
            r.chunks_total = Some(progress.chunks_total);
        })
    }

    async fn update_recording_completed(
        &self,
        id: Uuid,
        expected_version: i64,
        upload: &CompletedUpload,
    ) -> RepositoryResult<Recording> {
        self.update(id, expected_version, |r| {
            r.status = RecordingStatus::Uploaded;
            r.file_url = Some(upload.file_url.clone());
            r.file_size_bytes = Some(upload.file_size_bytes);
            r.duration_seconds = Some(upload.duration_seconds);
            r.uploaded_at = Some(upload.uploaded_at);
        })
    }

    async fn update_recording_processed(
        &self,
        id: Uuid,
        expected_version: i64,
        thumbnail_url: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> RepositoryResult<Recording> {
        {
            let mut state = self.state.lock().unwrap();
            if state.failing_processed_updates > 0 {
                state.failing_processed_updates -= 1;
                return Err(injected());
            }
        }

        self.update(id, expected_version, |r| {
            r.status = RecordingStatus::Completed;
            if thumbnail_url.is_some() {
                r.thumbnail_url = thumbnail_url;
            }
            r.processed_at = Some(processed_at);
        })
    }

    async fn update_retention_policy(
        &self,
        id: Uuid,
        expected_version: i64,
        policy: RetentionPolicy,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<Recording> {
        self.update(id, expected_version, |r| {
            r.retention_policy = policy;
            r.expires_at = expires_at;
        })
    }

    async fn mark_recording_deleted(
        &self,
        id: Uuid,
        expected_version: i64,
    ) -> RepositoryResult<Recording> {
        {
            let mut state = self.state.lock().unwrap();
            state.mark_deleted_calls.push(id);
            if state.failing_deletes.contains(&id) {
                return Err(injected());
            }
        }

        self.update(id, expected_version, |r| {
            r.status = RecordingStatus::Deleted;
            r.file_url = None;
        })
    }

    async fn get_expired_recordings(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Recording>> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .recordings
            .values()
            .filter(|r| {
                r.expires_at < now
                    && !matches!(r.status, RecordingStatus::Deleted | RecordingStatus::Failed)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.expires_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn upsert_consent(&self, consent: &Consent) -> RepositoryResult<Consent> {
        let mut state = self.state.lock().unwrap();
        let key = (consent.ride_id, consent.user_id);
        let stored = match state.consents.get(&key) {
            // Row identity survives a re-submission
            Some(existing) => Consent {
                id: existing.id,
                ..consent.clone()
            },
            None => consent.clone(),
        };
        state.consents.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_consents(&self, ride_id: Uuid) -> RepositoryResult<Vec<Consent>> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .consents
            .values()
            .filter(|c| c.ride_id == ride_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.consented_at);
        Ok(rows)
    }

    async fn check_all_consented(&self, ride_id: Uuid) -> RepositoryResult<bool> {
        let consents = self.list_consents(ride_id).await?;
        Ok(consents.len() == 2 && consents.iter().all(|c| c.consented))
    }

    async fn create_access_log(&self, entry: &AccessLog) -> RepositoryResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_access_logs {
            return Err(injected());
        }
        state.access_logs.push(entry.clone());
        Ok(())
    }

    async fn list_access_logs(&self, recording_id: Uuid) -> RepositoryResult<Vec<AccessLog>> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .access_logs
            .iter()
            .filter(|e| e.recording_id == recording_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.accessed_at.cmp(&a.accessed_at));
        Ok(rows)
    }

    async fn get_settings(&self, user_id: Uuid) -> RepositoryResult<Option<RecordingSettings>> {
        Ok(self.state.lock().unwrap().settings.get(&user_id).cloned())
    }

    async fn upsert_settings(
        &self,
        settings: &RecordingSettings,
    ) -> RepositoryResult<RecordingSettings> {
        let stored = RecordingSettings {
            updated_at: Some(Utc::now()),
            ..settings.clone()
        };
        self.state
            .lock()
            .unwrap()
            .settings
            .insert(stored.user_id, stored.clone());
        Ok(stored)
    }

    async fn get_recording_stats(&self, user_id: Option<Uuid>) -> RepositoryResult<RecordingStats> {
        let state = self.state.lock().unwrap();
        let mut stats = RecordingStats::default();

        for r in state
            .recordings
            .values()
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
        {
            stats.total_recordings += 1;
            match r.status {
                RecordingStatus::Completed => stats.completed_recordings += 1,
                RecordingStatus::Failed => stats.failed_recordings += 1,
                RecordingStatus::Deleted => stats.deleted_recordings += 1,
                _ => stats.active_recordings += 1,
            }
            match r.recording_type {
                RecordingType::Audio => stats.audio_recordings += 1,
                RecordingType::Video => stats.video_recordings += 1,
            }
            if r.status != RecordingStatus::Deleted {
                stats.total_duration_seconds += i64::from(r.duration_seconds.unwrap_or(0));
                stats.total_storage_bytes += r.file_size_bytes.unwrap_or(0);
            }
        }

        Ok(stats)
    }
}

#[derive(Default)]
struct StorageState {
    objects: HashMap<String, Bytes>,
    deleted: Vec<String>,
    presigned_uploads: Vec<(String, String, Duration)>,
    fail_deletes: bool,
    fail_presign: bool,
}

/// Blob store double that remembers what was asked of it
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<StorageState>,
}

impl MemoryStorage {
    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }

    pub fn fail_presign(&self, fail: bool) {
        self.state.lock().unwrap().fail_presign = fail;
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// (key, content type, ttl) for every presigned upload issued
    pub fn presigned_uploads(&self) -> Vec<(String, String, Duration)> {
        self.state.lock().unwrap().presigned_uploads.clone()
    }

    fn expiry(ttl: Duration) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1))
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<UploadedObject, StorageError> {
        let size = body.len() as u64;
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(key.to_string(), body);

        Ok(UploadedObject {
            key: key.to_string(),
            url: self.get_url(key),
            size,
            mime_type: content_type.to_string(),
            uploaded_at: Utc::now(),
        })
    }

    async fn download(&self, key: &str) -> Result<ObjectStream, StorageError> {
        let body = self
            .state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        Ok(Box::pin(stream::iter(vec![Ok(body)])))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(StorageError::Backend("bucket unavailable".to_string()));
        }
        state.objects.remove(key);
        state.deleted.push(key.to_string());
        Ok(())
    }

    fn get_url(&self, key: &str) -> String {
        format!("https://media.test/{key}")
    }

    async fn presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<PresignedUpload, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_presign {
            return Err(StorageError::Presign("signing key unavailable".to_string()));
        }
        state
            .presigned_uploads
            .push((key.to_string(), content_type.to_string(), ttl));

        Ok(PresignedUpload {
            url: format!("https://media.test/{key}?X-Amz-Signature=upload"),
            method: "PUT".to_string(),
            headers: HashMap::from([("content-type".to_string(), content_type.to_string())]),
            expires_at: Self::expiry(ttl),
        })
    }

    async fn presigned_download_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedDownload, StorageError> {
        if self.state.lock().unwrap().fail_presign {
            return Err(StorageError::Presign("signing key unavailable".to_string()));
        }

        Ok(PresignedDownload {
            url: format!("https://media.test/{key}?X-Amz-Signature=download"),
            expires_at: Self::expiry(ttl),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.state.lock().unwrap().objects.contains_key(key))
    }

    async fn copy(&self, source_key: &str, destination_key: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let body = state
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source_key.to_string()))?;
        state.objects.insert(destination_key.to_string(), body);
        Ok(())
    }
}

/// Dead-letter sink that keeps everything it receives
#[derive(Default)]
pub struct MemoryDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetters {
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn record(&self, letter: DeadLetter) {
        self.letters.lock().unwrap().push(letter);
    }
}
