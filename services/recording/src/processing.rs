//! Post-processing work queue.
//!
//! `CompleteUpload` hands each uploaded recording to this queue and returns
//! immediately. A worker owned by the service, not by the request, waits
//! the configured delay and moves the recording `uploaded -> processing ->
//! completed`. Failed attempts are retried with exponential backoff; once
//! the attempts are exhausted the recording is marked `failed` and a dead
//! letter is written.
//!
//! Delivery is at least once: the worker re-enqueues rows left in
//! `uploaded`/`processing` by a previous run, and the completion handler
//! acknowledges jobs for recordings that are already final without
//! touching them.

use crate::config::ProcessingConfig;
use crate::dead_letter::{DeadLetter, DeadLetterKind, DeadLetterSink};
use crate::error::RepositoryError;
use crate::models::{Recording, RecordingStatus};
use crate::repository::{RecordingRepository, RepositoryResult};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// A recording waiting for post-processing
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingJob {
    pub recording_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("processing queue is full")]
    Full,

    #[error("processing queue is closed")]
    Closed,
}

/// Producer side of the queue, cheap to clone
#[derive(Clone)]
pub struct ProcessingQueue {
    sender: mpsc::Sender<ProcessingJob>,
}

impl ProcessingQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProcessingJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a recording without waiting for capacity
    pub fn enqueue(&self, recording_id: Uuid) -> Result<(), EnqueueError> {
        let job = ProcessingJob {
            recording_id,
            enqueued_at: Utc::now(),
        };

        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

/// Result of one completion attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    Completed(Recording),
    /// Already completed, failed or deleted; nothing to do
    AlreadyFinal(RecordingStatus),
    /// Not uploaded yet; the job is dropped
    NotReady(RecordingStatus),
}

/// Idempotent completion logic, separate from queue plumbing
pub struct ProcessingHandler {
    repository: Arc<dyn RecordingRepository>,
}

impl ProcessingHandler {
    pub fn new(repository: Arc<dyn RecordingRepository>) -> Self {
        Self { repository }
    }

    pub async fn complete(&self, recording_id: Uuid) -> RepositoryResult<ProcessingOutcome> {
        let mut recording = self.repository.get_recording(recording_id).await?;

        match recording.status {
            status if status.is_terminal() => return Ok(ProcessingOutcome::AlreadyFinal(status)),
            RecordingStatus::Uploaded => {
                recording = self
                    .repository
                    .update_recording_status(
                        recording.id,
                        recording.version,
                        RecordingStatus::Processing,
                    )
                    .await?;
            }
            RecordingStatus::Processing => {}
            status => return Ok(ProcessingOutcome::NotReady(status)),
        }

        // Transcoding and thumbnailing run outside this service
        let completed = self
            .repository
            .update_recording_processed(recording.id, recording.version, None, Utc::now())
            .await?;

        Ok(ProcessingOutcome::Completed(completed))
    }

    /// Move a recording whose processing gave up to `failed`
    pub async fn fail(&self, recording_id: Uuid) -> RepositoryResult<Option<Recording>> {
        let mut recording = self.repository.get_recording(recording_id).await?;

        if recording.status == RecordingStatus::Uploaded {
            recording = self
                .repository
                .update_recording_status(recording.id, recording.version, RecordingStatus::Processing)
                .await?;
        }

        if recording.status != RecordingStatus::Processing {
            return Ok(None);
        }

        let failed = self
            .repository
            .update_recording_status(recording.id, recording.version, RecordingStatus::Failed)
            .await?;

        Ok(Some(failed))
    }
}

/// Consumer side of the queue
pub struct ProcessingWorker {
    receiver: mpsc::Receiver<ProcessingJob>,
    handler: Arc<ProcessingHandler>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: ProcessingConfig,
    permits: Arc<Semaphore>,
}

impl ProcessingWorker {
    pub fn new(
        receiver: mpsc::Receiver<ProcessingJob>,
        repository: Arc<dyn RecordingRepository>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            receiver,
            handler: Arc::new(ProcessingHandler::new(repository)),
            dead_letters,
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config,
        }
    }

    /// Process jobs until the token is cancelled or every producer is gone.
    /// At most `max_concurrent_jobs` run at once; the next job is not taken
    /// off the queue until a slot frees up. Jobs still in flight at shutdown
    /// are abandoned and picked up again by [`recover_pending`] on the next
    /// start.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Processing worker started"
        );

        let mut in_flight = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(in_flight = in_flight.len(), "Processing worker shutting down");
                    break;
                }
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(error = %e, "Processing permits closed");
                        break;
                    }
                },
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_finished(result);
                    continue;
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(in_flight = in_flight.len(), "Processing worker shutting down");
                    break;
                }
                job = self.receiver.recv() => {
                    let Some(job) = job else {
                        debug!("Processing queue closed");
                        break;
                    };
                    let handler = self.handler.clone();
                    let dead_letters = self.dead_letters.clone();
                    let config = self.config.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        process_job(job, handler, dead_letters, config).await;
                    });
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_finished(result);
                }
            }
        }

        if shutdown.is_cancelled() {
            in_flight.shutdown().await;
        } else {
            while let Some(result) = in_flight.join_next().await {
                log_finished(result);
            }
        }

        info!("Processing worker stopped");
    }
}

fn log_finished(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Processing task panicked");
    }
}

/// Re-enqueue recordings a previous run left unprocessed
pub async fn recover_pending(
    queue: &ProcessingQueue,
    repository: &dyn RecordingRepository,
    limit: i64,
) -> RepositoryResult<usize> {
    let pending = repository
        .list_recordings_by_status(
            &[RecordingStatus::Uploaded, RecordingStatus::Processing],
            limit,
        )
        .await?;

    let mut queued = 0;
    for recording in pending {
        match queue.enqueue(recording.id) {
            Ok(()) => queued += 1,
            Err(e) => {
                warn!(error = %e, recording_id = %recording.id, "Stopped recovering pending recordings");
                break;
            }
        }
    }

    if queued > 0 {
        info!(count = queued, "Re-enqueued pending recordings");
    }

    Ok(queued)
}

#[instrument(skip(handler, dead_letters, config), fields(recording_id = %job.recording_id))]
async fn process_job(
    job: ProcessingJob,
    handler: Arc<ProcessingHandler>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: ProcessingConfig,
) {
    tokio::time::sleep(config.delay()).await;

    let mut backoff = ExponentialBackoff {
        current_interval: config.initial_backoff(),
        initial_interval: config.initial_backoff(),
        max_interval: config.max_backoff(),
        max_elapsed_time: None, // bounded by max_attempts instead
        ..Default::default()
    };
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match handler.complete(job.recording_id).await {
            Ok(ProcessingOutcome::Completed(recording)) => {
                info!(attempt, version = recording.version, "Recording processed");
                metrics::counter!("recording.completed").increment(1);
                return;
            }
            Ok(ProcessingOutcome::AlreadyFinal(status)) => {
                debug!(status = %status, "Recording already final, acknowledging job");
                return;
            }
            Ok(ProcessingOutcome::NotReady(status)) => {
                warn!(status = %status, "Recording not ready for processing, dropping job");
                return;
            }
            Err(RepositoryError::NotFound(_)) => {
                warn!("Recording vanished before processing");
                return;
            }
            Err(e) if attempt < max_attempts => {
                let delay = backoff.next_backoff().unwrap_or_else(|| config.max_backoff());
                warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Processing attempt failed, retrying"
                );
                metrics::counter!("recording.processing.retries").increment(1);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(error = %e, attempts = attempt, "Processing failed, giving up");
                metrics::counter!("recording.failed").increment(1);

                if let Err(fail_err) = handler.fail(job.recording_id).await {
                    error!(error = %fail_err, "Failed to mark recording as failed");
                }

                let letter = DeadLetter::new(DeadLetterKind::Processing, Some(job.recording_id), e)
                    .with_subject(format!("attempts={attempt}"));
                dead_letters.record(letter).await;
                return;
            }
        }
    }
}
