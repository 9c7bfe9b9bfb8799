//! Error taxonomy for the recording service.
//!
//! Collaborators report [`RepositoryError`] and [`StorageError`]; public
//! operations only ever surface [`ServiceError`], whose variants map to a
//! stable classification code plus a short message. Backend error text is
//! logged and never copied into a `ServiceError`.

use thiserror::Error;
use tracing::error;

/// Errors returned by the persistence layer
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("recording {0} was modified concurrently")]
    VersionMismatch(uuid::Uuid),

    #[error("invalid stored value: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors returned by the object storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("failed to presign request: {0}")]
    Presign(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by public recording operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable classification code for callers
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::BadRequest(_) => "BAD_REQUEST",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Short user-visible message
    pub fn message(&self) -> &str {
        match self {
            ServiceError::NotFound(m)
            | ServiceError::Forbidden(m)
            | ServiceError::BadRequest(m)
            | ServiceError::Conflict(m)
            | ServiceError::Internal(m) => m,
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        ServiceError::BadRequest(message.into())
    }

    pub(crate) fn forbidden() -> Self {
        ServiceError::Forbidden("you do not have access to this recording".to_string())
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(entity) => ServiceError::NotFound(format!("{entity} not found")),
            RepositoryError::Conflict(message) => ServiceError::Conflict(message),
            RepositoryError::VersionMismatch(_) => {
                ServiceError::Conflict("recording was modified concurrently, retry".to_string())
            }
            other => {
                error!(error = %other, "Repository operation failed");
                ServiceError::Internal("internal server error".to_string())
            }
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        error!(error = %err, "Storage operation failed");
        ServiceError::Internal("storage operation failed".to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
