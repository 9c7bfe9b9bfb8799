//! Ridecast Recording Service
//!
//! Lets riders and drivers capture audio/video during a trip and manages
//! that media from creation to purge: consent tracking, direct-to-bucket
//! uploads through presigned URLs, audited access and policy-driven
//! retention.
//!
//! ## Features
//!
//! - **Lifecycle state machine**: `initialized -> recording <-> paused ->
//!   stopped -> uploaded -> processing -> completed`, with `deleted`
//!   reachable from every state
//! - **Direct transfers**: media never passes through the service; clients
//!   upload and download against S3 with presigned URLs
//! - **Consent ledger**: per-ride, per-participant agreement to be recorded
//! - **Access audit**: every issued media URL is logged with who and why
//! - **Retention**: standard, extended and permanent windows with batched,
//!   failure-tolerant cleanup
//!
//! ## Architecture
//!
//! ```text
//!  Client                 S3 Bucket                PostgreSQL
//! ┌──────────────┐ PUT/GET ┌──────────────┐         ┌────────────────────┐
//! │ App          │────────▶│ recordings/  │         │ recordings         │
//! └──────────────┘         │   {ride}/    │         │ recording_consents │
//!        │                 │   {user}/    │         │ access logs        │
//!        ▼                 └──────────────┘         │ dead_letters       │
//! ┌──────────────┐                ▲                 └────────────────────┘
//! │ Lifecycle    │────────────────┘                           ▲
//! │ Manager      │────────────────────────────────────────────┤
//! └──────────────┘                                            │
//!        │ enqueue                                            │
//!        ▼                                                    │
//! ┌──────────────┐        ┌──────────────┐                    │
//! │ Processing   │        │ Retention    │────────────────────┘
//! │ Worker       │        │ Scheduler    │
//! └──────────────┘        └──────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod consent;
pub mod dead_letter;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod pg_repository;
pub mod processing;
pub mod repository;
pub mod retention;
pub mod s3_storage;
pub mod service;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::AccessAuditor;
pub use config::Config;
pub use consent::{ConsentLedger, ConsentRequest};
pub use dead_letter::{DeadLetter, DeadLetterKind, DeadLetterSink, TracingDeadLetterSink};
pub use error::{RepositoryError, ServiceError, ServiceResult, StorageError};
pub use lifecycle::LifecycleManager;
pub use models::*;
pub use pg_repository::PgRecordingRepository;
pub use processing::{ProcessingQueue, ProcessingWorker};
pub use repository::RecordingRepository;
pub use retention::RetentionScheduler;
pub use s3_storage::S3Storage;
pub use service::RecordingService;
pub use storage::ObjectStorage;
