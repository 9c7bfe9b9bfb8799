//! Sink for secondary-effect failures.
//!
//! Object deletes, audit writes and post-processing may fail without
//! failing the state transition that triggered them. Those failures are
//! handed to a [`DeadLetterSink`] so they can be reconciled later.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// What kind of secondary effect failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterKind {
    /// Backing object could not be removed from the blob store
    StorageDelete,
    /// Access audit entry could not be written
    AccessLog,
    /// Post-processing exhausted its retries
    Processing,
    /// Post-processing job could not be queued
    Enqueue,
}

impl DeadLetterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterKind::StorageDelete => "storage_delete",
            DeadLetterKind::AccessLog => "access_log",
            DeadLetterKind::Processing => "processing",
            DeadLetterKind::Enqueue => "enqueue",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub kind: DeadLetterKind,
    pub recording_id: Option<Uuid>,
    /// Object key, accessor, or other context needed to replay the effect
    pub subject: Option<String>,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(kind: DeadLetterKind, recording_id: Option<Uuid>, error: impl ToString) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            recording_id,
            subject: None,
            error: error.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Receives failures that must not block the primary operation.
/// Implementations swallow their own errors.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter);
}

/// Sink that only logs and counts
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for TracingDeadLetterSink {
    async fn record(&self, letter: DeadLetter) {
        warn!(
            kind = letter.kind.as_str(),
            recording_id = ?letter.recording_id,
            subject = ?letter.subject,
            error = %letter.error,
            "Secondary effect failed"
        );
        metrics::counter!("recording.dead_letters", "kind" => letter.kind.as_str()).increment(1);
    }
}
