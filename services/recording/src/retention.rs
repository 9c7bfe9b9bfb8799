use crate::config::RetentionConfig;
use crate::dead_letter::DeadLetterSink;
use crate::error::{ServiceError, ServiceResult};
use crate::lifecycle::remove_object;
use crate::models::{Recording, RecordingStatus, RetentionPolicy};
use crate::repository::RecordingRepository;
use crate::storage::ObjectStorage;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Policy-driven expiry and batched cleanup of expired recordings.
///
/// Cleanup is single-shot: each call handles at most one batch and the
/// caller decides when to run the next one.
pub struct RetentionScheduler {
    repository: Arc<dyn RecordingRepository>,
    storage: Arc<dyn ObjectStorage>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: RetentionConfig,
}

impl RetentionScheduler {
    pub fn new(
        repository: Arc<dyn RecordingRepository>,
        storage: Arc<dyn ObjectStorage>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            repository,
            storage,
            dead_letters,
            config,
        }
    }

    /// Reset the expiry to now plus the policy's window. A weaker policy
    /// shortens the window.
    #[instrument(skip(self))]
    pub async fn extend_retention(
        &self,
        recording_id: Uuid,
        policy: RetentionPolicy,
    ) -> ServiceResult<Recording> {
        if recording_id.is_nil() {
            return Err(ServiceError::bad_request("recording_id is required"));
        }

        let recording = self.repository.get_recording(recording_id).await?;
        if recording.status == RecordingStatus::Deleted {
            return Err(ServiceError::bad_request("recording already deleted"));
        }

        let expires_at = policy.expires_at(Utc::now());
        if expires_at < recording.expires_at {
            info!(
                previous_policy = %recording.retention_policy,
                previous_expires_at = %recording.expires_at,
                "Retention window shortened"
            );
        }

        let updated = self
            .repository
            .update_retention_policy(recording.id, recording.version, policy, expires_at)
            .await?;

        info!(policy = %policy, expires_at = %expires_at, "Retention policy updated");

        Ok(updated)
    }

    /// Delete one batch of expired recordings. Returns how many rows were
    /// marked deleted; rows that fail are skipped until the next run.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_recordings(&self) -> ServiceResult<usize> {
        let expired = self
            .repository
            .get_expired_recordings(Utc::now(), self.config.cleanup_batch_size)
            .await?;

        let found = expired.len();
        let mut deleted = 0;

        for recording in expired {
            if recording.file_url.is_some() {
                remove_object(self.storage.as_ref(), self.dead_letters.as_ref(), &recording).await;
            }

            match self
                .repository
                .mark_recording_deleted(recording.id, recording.version)
                .await
            {
                Ok(_) => deleted += 1,
                Err(e) => {
                    error!(error = %e, recording_id = %recording.id, "Failed to mark expired recording deleted");
                    metrics::counter!("recording.cleanup.failed").increment(1);
                }
            }
        }

        if deleted < found {
            warn!(found, deleted, "Cleanup finished with failures");
        } else if found > 0 {
            info!(deleted, "Expired recordings cleaned up");
        }
        metrics::counter!("recording.cleanup.deleted").increment(deleted as u64);

        Ok(deleted)
    }
}
