//! Recording lifecycle manager.
//!
//! Orchestrates start, pause/resume, stop, upload completion, access and
//! deletion against object storage and the repository. Every transition is
//! checked against [`RecordingStatus::can_transition_to`] and written with
//! the version that was read, so a concurrent writer turns into a
//! `Conflict` instead of a lost update.

use crate::audit::AccessAuditor;
use crate::config::RecordingConfig;
use crate::dead_letter::{DeadLetter, DeadLetterKind, DeadLetterSink};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    AccessLog, AccessType, GeoPoint, RecorderRole, Recording, RecordingAccess, RecordingSettings,
    RecordingStats, RecordingStatus, RecordingType, StartRecordingRequest, StartRecordingResponse,
    UpdateSettingsRequest,
};
use crate::processing::ProcessingQueue;
use crate::repository::{CompletedUpload, RecordingRepository, UploadProgress};
use crate::storage::ObjectStorage;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

fn require_id(id: Uuid, field: &str) -> ServiceResult<()> {
    if id.is_nil() {
        return Err(ServiceError::bad_request(format!("{field} is required")));
    }
    Ok(())
}

pub struct LifecycleManager {
    repository: Arc<dyn RecordingRepository>,
    storage: Arc<dyn ObjectStorage>,
    auditor: AccessAuditor,
    dead_letters: Arc<dyn DeadLetterSink>,
    processing: ProcessingQueue,
    config: RecordingConfig,
}

impl LifecycleManager {
    pub fn new(
        repository: Arc<dyn RecordingRepository>,
        storage: Arc<dyn ObjectStorage>,
        dead_letters: Arc<dyn DeadLetterSink>,
        processing: ProcessingQueue,
        config: RecordingConfig,
    ) -> Self {
        let auditor = AccessAuditor::new(repository.clone(), dead_letters.clone());

        Self {
            repository,
            storage,
            auditor,
            dead_letters,
            processing,
            config,
        }
    }

    /// Open a capture session and hand back a presigned upload URL.
    ///
    /// If URL issuance fails after the row is written, the row stays
    /// `initialized`; retention cleanup eventually removes it.
    #[instrument(skip(self, request), fields(ride_id = %request.ride_id))]
    pub async fn start_recording(
        &self,
        user_id: Uuid,
        role: RecorderRole,
        request: StartRecordingRequest,
    ) -> ServiceResult<StartRecordingResponse> {
        require_id(user_id, "user_id")?;
        require_id(request.ride_id, "ride_id")?;

        let recording_type: RecordingType = request.recording_type.parse().map_err(|_| {
            ServiceError::bad_request(format!(
                "unsupported recording type: {}",
                request.recording_type
            ))
        })?;

        if let Some(active) = self
            .repository
            .get_active_recording(request.ride_id, user_id)
            .await?
        {
            debug!(active_recording_id = %active.id, status = %active.status, "Active recording exists");
            return Err(ServiceError::Conflict(
                "an active recording already exists for this ride".to_string(),
            ));
        }

        // The partial unique index still rejects a concurrent start that
        // slipped past the read above.
        let recording = Recording::initialize(user_id, role, &request, recording_type, Utc::now());
        self.repository.create_recording(&recording).await?;

        let upload_key = recording.object_key();
        let presigned = self
            .storage
            .presigned_upload_url(
                &upload_key,
                recording_type.content_type(),
                self.config.upload_url_ttl(),
            )
            .await?;

        let recording = self.transition(&recording, RecordingStatus::Recording).await?;

        info!(
            recording_id = %recording.id,
            recording_type = %recording_type,
            role = %role,
            "Recording started"
        );
        metrics::counter!("recording.started", "type" => recording_type.as_str()).increment(1);

        Ok(StartRecordingResponse {
            recording_id: recording.id,
            upload_url: presigned.url,
            upload_method: presigned.method,
            upload_headers: presigned.headers,
            upload_key,
            upload_expires_at: presigned.expires_at,
            max_duration_secs: self.config.max_duration_secs(),
            max_file_size_bytes: self.config.max_file_size_bytes(),
            status: recording.status,
        })
    }

    #[instrument(skip(self))]
    pub async fn pause_recording(&self, user_id: Uuid, recording_id: Uuid) -> ServiceResult<Recording> {
        let recording = self.owned_recording(user_id, recording_id).await?;

        if recording.status != RecordingStatus::Recording {
            return Err(ServiceError::bad_request("recording is not in progress"));
        }

        self.transition(&recording, RecordingStatus::Paused).await
    }

    #[instrument(skip(self))]
    pub async fn resume_recording(&self, user_id: Uuid, recording_id: Uuid) -> ServiceResult<Recording> {
        let recording = self.owned_recording(user_id, recording_id).await?;

        if recording.status != RecordingStatus::Paused {
            return Err(ServiceError::bad_request("recording is not paused"));
        }

        self.transition(&recording, RecordingStatus::Recording).await
    }

    /// End the capture session, recording its wall-clock duration
    #[instrument(skip(self))]
    pub async fn stop_recording(
        &self,
        user_id: Uuid,
        recording_id: Uuid,
        end_location: Option<GeoPoint>,
    ) -> ServiceResult<Recording> {
        let recording = self.owned_recording(user_id, recording_id).await?;

        if !recording.status.is_capturing() {
            return Err(ServiceError::bad_request("recording is not active"));
        }

        let ended_at = Utc::now();
        let duration_seconds = (ended_at - recording.started_at)
            .num_seconds()
            .clamp(0, i32::MAX as i64) as i32;

        let stopped = self
            .repository
            .update_recording_stopped(
                recording.id,
                recording.version,
                ended_at,
                duration_seconds,
                end_location,
            )
            .await?;

        info!(recording_id = %recording_id, duration_seconds, "Recording stopped");
        metrics::counter!("recording.stopped").increment(1);

        Ok(stopped)
    }

    /// Record chunked-transfer progress for a stopped recording
    #[instrument(skip(self, progress))]
    pub async fn report_upload_progress(
        &self,
        user_id: Uuid,
        recording_id: Uuid,
        progress: UploadProgress,
    ) -> ServiceResult<Recording> {
        let recording = self.owned_recording(user_id, recording_id).await?;

        if progress.upload_id.trim().is_empty() {
            return Err(ServiceError::bad_request("upload_id is required"));
        }
        if progress.chunks_total <= 0
            || progress.chunks_received < 0
            || progress.chunks_received > progress.chunks_total
        {
            return Err(ServiceError::bad_request("invalid chunk counts"));
        }
        if !matches!(
            recording.status,
            RecordingStatus::Stopped | RecordingStatus::Uploading
        ) {
            return Err(ServiceError::bad_request(
                "recording must be stopped before uploading",
            ));
        }

        Ok(self
            .repository
            .update_recording_upload(recording.id, recording.version, &progress)
            .await?)
    }

    /// Validate and persist the uploaded media, then queue post-processing.
    /// Post-processing runs on the service's worker, never on the caller.
    #[instrument(skip(self))]
    pub async fn complete_upload(
        &self,
        user_id: Uuid,
        recording_id: Uuid,
        total_size: u64,
        duration_seconds: i32,
    ) -> ServiceResult<Recording> {
        let recording = self.owned_recording(user_id, recording_id).await?;

        let max_size = self.config.max_file_size_bytes();
        if total_size > max_size {
            return Err(ServiceError::bad_request(format!(
                "file size exceeds maximum allowed ({max_size} bytes)"
            )));
        }
        if duration_seconds < 0 {
            return Err(ServiceError::bad_request("duration must not be negative"));
        }
        if !recording.status.can_transition_to(RecordingStatus::Uploaded) {
            return Err(ServiceError::bad_request(
                "recording must be stopped before completing upload",
            ));
        }

        let upload = CompletedUpload {
            file_url: self.storage.get_url(&recording.object_key()),
            file_size_bytes: i64::try_from(total_size)
                .map_err(|_| ServiceError::bad_request("file size out of range"))?,
            duration_seconds,
            uploaded_at: Utc::now(),
        };

        let uploaded = self
            .repository
            .update_recording_completed(recording.id, recording.version, &upload)
            .await?;

        metrics::counter!("recording.uploaded").increment(1);
        metrics::counter!("recording.uploaded.bytes").increment(total_size);

        if let Err(e) = self.processing.enqueue(uploaded.id) {
            warn!(error = %e, recording_id = %uploaded.id, "Failed to queue post-processing");
            self.dead_letters
                .record(DeadLetter::new(DeadLetterKind::Enqueue, Some(uploaded.id), e))
                .await;
        }

        info!(recording_id = %recording_id, size_bytes = total_size, "Upload completed");

        Ok(uploaded)
    }

    /// Owner access. Completed media comes with a presigned download URL,
    /// and issuing it is audited.
    #[instrument(skip(self))]
    pub async fn get_recording(&self, user_id: Uuid, recording_id: Uuid) -> ServiceResult<RecordingAccess> {
        let recording = self.owned_recording(user_id, recording_id).await?;
        let access = self.with_access_url(recording).await?;

        if access.access_url.is_some() {
            self.auditor
                .log_access(recording_id, user_id, AccessType::View, None)
                .await;
        }

        Ok(access)
    }

    /// Support/admin access, bypassing ownership. Always audited with the
    /// stated reason.
    #[instrument(skip(self, reason))]
    pub async fn admin_get_recording(
        &self,
        admin_id: Uuid,
        recording_id: Uuid,
        reason: Option<String>,
    ) -> ServiceResult<RecordingAccess> {
        require_id(admin_id, "admin_id")?;

        let recording = self.repository.get_recording(recording_id).await?;
        let access = self.with_access_url(recording).await?;

        self.auditor
            .log_access(recording_id, admin_id, AccessType::AdminView, reason)
            .await;

        Ok(access)
    }

    /// Remove the media and mark the row deleted. The row itself is kept
    /// for audit. Object removal is best effort.
    #[instrument(skip(self))]
    pub async fn delete_recording(&self, user_id: Uuid, recording_id: Uuid) -> ServiceResult<()> {
        let recording = self.owned_recording(user_id, recording_id).await?;

        if recording.status == RecordingStatus::Deleted {
            return Err(ServiceError::bad_request("recording already deleted"));
        }

        if recording.file_url.is_some() {
            remove_object(self.storage.as_ref(), self.dead_letters.as_ref(), &recording).await;
        }

        self.repository
            .mark_recording_deleted(recording.id, recording.version)
            .await?;

        info!(recording_id = %recording_id, "Recording deleted");
        metrics::counter!("recording.deleted").increment(1);

        Ok(())
    }

    pub async fn get_recordings_for_ride(&self, ride_id: Uuid) -> ServiceResult<Vec<Recording>> {
        Ok(self.repository.list_recordings_for_ride(ride_id).await?)
    }

    /// Stored settings, or the defaults when the user never saved any
    pub async fn get_settings(&self, user_id: Uuid) -> ServiceResult<RecordingSettings> {
        Ok(self
            .repository
            .get_settings(user_id)
            .await?
            .unwrap_or_else(|| RecordingSettings::default_for(user_id)))
    }

    pub async fn update_settings(
        &self,
        user_id: Uuid,
        update: UpdateSettingsRequest,
    ) -> ServiceResult<RecordingSettings> {
        require_id(user_id, "user_id")?;

        let mut settings = self.get_settings(user_id).await?;
        settings.apply(&update);

        Ok(self.repository.upsert_settings(&settings).await?)
    }

    pub async fn get_recording_stats(&self, user_id: Option<Uuid>) -> ServiceResult<RecordingStats> {
        Ok(self.repository.get_recording_stats(user_id).await?)
    }

    /// Admin view of who accessed a recording, newest first
    pub async fn get_access_logs(&self, recording_id: Uuid) -> ServiceResult<Vec<AccessLog>> {
        self.auditor.access_history(recording_id).await
    }

    async fn owned_recording(&self, user_id: Uuid, recording_id: Uuid) -> ServiceResult<Recording> {
        require_id(recording_id, "recording_id")?;

        let recording = self.repository.get_recording(recording_id).await?;
        if !recording.is_owned_by(user_id) {
            warn!(
                recording_id = %recording_id,
                user_id = %user_id,
                "Recording access denied"
            );
            return Err(ServiceError::forbidden());
        }

        Ok(recording)
    }

    async fn transition(&self, recording: &Recording, next: RecordingStatus) -> ServiceResult<Recording> {
        if !recording.status.can_transition_to(next) {
            return Err(ServiceError::bad_request(format!(
                "cannot move recording from {} to {}",
                recording.status, next
            )));
        }

        Ok(self
            .repository
            .update_recording_status(recording.id, recording.version, next)
            .await?)
    }

    async fn with_access_url(&self, recording: Recording) -> ServiceResult<RecordingAccess> {
        if recording.status != RecordingStatus::Completed || recording.file_url.is_none() {
            return Ok(RecordingAccess {
                recording,
                access_url: None,
                access_url_expires_at: None,
            });
        }

        let presigned = self
            .storage
            .presigned_download_url(&recording.object_key(), self.config.download_url_ttl())
            .await?;

        Ok(RecordingAccess {
            recording,
            access_url: Some(presigned.url),
            access_url_expires_at: Some(presigned.expires_at),
        })
    }
}

/// Delete a recording's backing object, reporting failures to the sink
pub(crate) async fn remove_object(
    storage: &dyn ObjectStorage,
    dead_letters: &dyn DeadLetterSink,
    recording: &Recording,
) {
    let key = recording.object_key();

    if let Err(e) = storage.delete(&key).await {
        warn!(error = %e, recording_id = %recording.id, key = %key, "Failed to delete recording object");
        let letter =
            DeadLetter::new(DeadLetterKind::StorageDelete, Some(recording.id), e).with_subject(key);
        dead_letters.record(letter).await;
    }
}
