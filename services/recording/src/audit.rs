use crate::dead_letter::{DeadLetter, DeadLetterKind, DeadLetterSink};
use crate::error::ServiceResult;
use crate::models::{AccessLog, AccessType};
use crate::repository::RecordingRepository;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Append-only log of who was handed a recording's media, and why.
///
/// Writes are best effort: a failed write is reported to the dead-letter
/// sink and never fails the access request that triggered it.
#[derive(Clone)]
pub struct AccessAuditor {
    repository: Arc<dyn RecordingRepository>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl AccessAuditor {
    pub fn new(
        repository: Arc<dyn RecordingRepository>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            repository,
            dead_letters,
        }
    }

    pub async fn log_access(
        &self,
        recording_id: Uuid,
        accessed_by: Uuid,
        access_type: AccessType,
        reason: Option<String>,
    ) {
        let entry = AccessLog {
            id: Uuid::new_v4(),
            recording_id,
            accessed_by,
            access_type,
            reason,
            accessed_at: Utc::now(),
        };

        match self.repository.create_access_log(&entry).await {
            Ok(()) => {
                debug!(
                    recording_id = %recording_id,
                    accessed_by = %accessed_by,
                    access_type = access_type.as_str(),
                    "Access logged"
                );
                metrics::counter!("recording.access.logged", "type" => access_type.as_str())
                    .increment(1);
            }
            Err(e) => {
                warn!(
                    error = %e,
                    recording_id = %recording_id,
                    accessed_by = %accessed_by,
                    "Failed to write access log"
                );
                let letter = DeadLetter::new(DeadLetterKind::AccessLog, Some(recording_id), e)
                    .with_subject(format!("{}:{}", access_type.as_str(), accessed_by));
                self.dead_letters.record(letter).await;
            }
        }
    }

    pub async fn access_history(&self, recording_id: Uuid) -> ServiceResult<Vec<AccessLog>> {
        Ok(self.repository.list_access_logs(recording_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDeadLetters, MemoryRepository};

    #[tokio::test]
    async fn test_access_is_appended() {
        let repository = Arc::new(MemoryRepository::default());
        let auditor = AccessAuditor::new(repository.clone(), Arc::new(MemoryDeadLetters::default()));
        let recording = Uuid::new_v4();
        let viewer = Uuid::new_v4();

        auditor
            .log_access(recording, viewer, AccessType::View, None)
            .await;
        auditor
            .log_access(recording, viewer, AccessType::AdminView, Some("dispute #881".into()))
            .await;

        let history = auditor.access_history(recording).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .any(|e| e.access_type == AccessType::AdminView
                && e.reason.as_deref() == Some("dispute #881")));
    }

    #[tokio::test]
    async fn test_write_failure_goes_to_dead_letters() {
        let repository = Arc::new(MemoryRepository::default());
        repository.fail_access_logs(true);
        let dead_letters = Arc::new(MemoryDeadLetters::default());
        let auditor = AccessAuditor::new(repository.clone(), dead_letters.clone());
        let recording = Uuid::new_v4();

        auditor
            .log_access(recording, Uuid::new_v4(), AccessType::View, None)
            .await;

        let letters = dead_letters.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].kind, DeadLetterKind::AccessLog);
        assert_eq!(letters[0].recording_id, Some(recording));
        assert!(auditor.access_history(recording).await.unwrap().is_empty());
    }
}
