use crate::config::Config;
use crate::consent::ConsentLedger;
use crate::dead_letter::DeadLetterSink;
use crate::lifecycle::LifecycleManager;
use crate::processing::{recover_pending, ProcessingQueue, ProcessingWorker};
use crate::repository::RecordingRepository;
use crate::retention::RetentionScheduler;
use crate::storage::ObjectStorage;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the transport layer needs, wired against one repository,
/// one object store and one dead-letter sink
pub struct RecordingService {
    pub lifecycle: Arc<LifecycleManager>,
    pub consent: Arc<ConsentLedger>,
    pub retention: Arc<RetentionScheduler>,
    repository: Arc<dyn RecordingRepository>,
    queue: ProcessingQueue,
    recovery_batch_size: i64,
}

impl RecordingService {
    /// Build the service. The returned worker must be spawned by the caller
    /// for post-processing to make progress.
    pub fn new(
        config: &Config,
        repository: Arc<dyn RecordingRepository>,
        storage: Arc<dyn ObjectStorage>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> (Self, ProcessingWorker) {
        let (queue, receiver) = ProcessingQueue::channel(config.processing.queue_capacity);

        let worker = ProcessingWorker::new(
            receiver,
            repository.clone(),
            dead_letters.clone(),
            config.processing.clone(),
        );

        let lifecycle = LifecycleManager::new(
            repository.clone(),
            storage.clone(),
            dead_letters.clone(),
            queue.clone(),
            config.recording.clone(),
        );

        let retention = RetentionScheduler::new(
            repository.clone(),
            storage,
            dead_letters,
            config.retention.clone(),
        );

        let service = Self {
            lifecycle: Arc::new(lifecycle),
            consent: Arc::new(ConsentLedger::new(repository.clone())),
            retention: Arc::new(retention),
            repository,
            queue,
            recovery_batch_size: config.processing.recovery_batch_size,
        };

        (service, worker)
    }

    /// Re-queue uploads a previous process left unprocessed
    pub async fn recover_pending_processing(&self) -> usize {
        match recover_pending(&self.queue, self.repository.as_ref(), self.recovery_batch_size).await
        {
            Ok(queued) => {
                info!(queued, "Pending post-processing recovered");
                queued
            }
            Err(e) => {
                warn!(error = %e, "Failed to recover pending post-processing");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, ProcessingConfig, S3Config};
    use crate::consent::ConsentRequest;
    use crate::models::{RecorderRole, RecordingStatus, StartRecordingRequest};
    use crate::testing::{sample_recording, MemoryDeadLetters, MemoryRepository, MemoryStorage};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn test_config() -> Config {
        Config {
            service: Default::default(),
            s3: S3Config {
                bucket: "recordings-test".to_string(),
                region: "us-east-1".to_string(),
                endpoint_url: None,
                force_path_style: false,
                public_base_url: None,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/recordings".to_string(),
                max_connections: 1,
                min_connections: 1,
                connect_timeout_secs: 1,
                idle_timeout_secs: 1,
                run_migrations: false,
            },
            recording: Default::default(),
            processing: ProcessingConfig {
                delay_ms: 10,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                ..Default::default()
            },
            retention: Default::default(),
        }
    }

    async fn wait_for_status(
        repository: &MemoryRepository,
        id: Uuid,
        status: RecordingStatus,
    ) -> bool {
        for _ in 0..200 {
            if repository.recording(id).map(|r| r.status) == Some(status) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_recording_lifecycle_end_to_end() {
        let repository = Arc::new(MemoryRepository::default());
        let (service, worker) = RecordingService::new(
            &test_config(),
            repository.clone(),
            Arc::new(MemoryStorage::default()),
            Arc::new(MemoryDeadLetters::default()),
        );
        let shutdown = CancellationToken::new();
        let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

        let ride = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let driver = Uuid::new_v4();
        for (user, role) in [(rider, RecorderRole::Rider), (driver, RecorderRole::Driver)] {
            service
                .consent
                .record_consent(
                    user,
                    role,
                    ConsentRequest {
                        ride_id: ride,
                        consented: true,
                        ip_address: None,
                        user_agent: None,
                    },
                )
                .await
                .unwrap();
        }
        assert!(service.consent.check_consent(ride).await.unwrap());

        let started = service
            .lifecycle
            .start_recording(
                rider,
                RecorderRole::Rider,
                StartRecordingRequest {
                    ride_id: ride,
                    recording_type: "audio".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let id = started.recording_id;

        service.lifecycle.stop_recording(rider, id, None).await.unwrap();
        let uploaded = service
            .lifecycle
            .complete_upload(rider, id, 1_048_576, 30)
            .await
            .unwrap();
        assert_eq!(uploaded.status, RecordingStatus::Uploaded);

        assert!(wait_for_status(&repository, id, RecordingStatus::Completed).await);

        let access = service.lifecycle.get_recording(rider, id).await.unwrap();
        assert!(access.access_url.is_some());
        assert!(access.recording.processed_at.is_some());

        shutdown.cancel();
        worker_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_recovery_finishes_stranded_uploads() {
        let repository = Arc::new(MemoryRepository::default());
        let stranded = sample_recording();
        repository.insert(stranded.clone());

        let (service, worker) = RecordingService::new(
            &test_config(),
            repository.clone(),
            Arc::new(MemoryStorage::default()),
            Arc::new(MemoryDeadLetters::default()),
        );
        let shutdown = CancellationToken::new();
        let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

        assert_eq!(service.recover_pending_processing().await, 1);
        assert!(wait_for_status(&repository, stranded.id, RecordingStatus::Completed).await);

        shutdown.cancel();
        worker_handle.await.unwrap();
    }
}
