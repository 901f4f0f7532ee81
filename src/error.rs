//! Crate-wide error taxonomy.
//!
//! Component errors (`MigrationError`, `StoreError`, ...) are narrow and
//! specific; they convert into `AppError` at the HTTP boundary, which is the
//! only place a stable `ErrorCode` and status mapping need to exist.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Stable machine-readable error codes returned to callers (spec §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    VersionConflict,
    Deleted,
    PinnedRequiresForce,
    Forbidden,
    Timeout,
    InvalidPayload,
    Internal,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::InvalidPayload => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::VersionConflict => StatusCode::CONFLICT,
            ErrorCode::Deleted | ErrorCode::PinnedRequiresForce => StatusCode::PRECONDITION_FAILED,
            ErrorCode::Forbidden => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::VersionConflict => "version_conflict",
            ErrorCode::Deleted => "deleted",
            ErrorCode::PinnedRequiresForce => "pinned_requires_force",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Timeout => "timeout",
            ErrorCode::InvalidPayload => "invalid_payload",
            ErrorCode::Internal => "internal",
        }
    }
}

/// Top-level error surfaced at the HTTP boundary. Never carries a stack
/// trace or internal message text to the caller beyond `message`.
#[derive(Debug, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPayload, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.code == ErrorCode::Internal {
            tracing::error!(code = self.code.as_str(), message = %self.message, "request failed");
        } else {
            tracing::warn!(code = self.code.as_str(), message = %self.message, "request rejected");
        }
        let body = ErrorBody {
            error: self.code.as_str(),
            message: &self.message,
        };
        (self.code.status(), axum::Json(body)).into_response()
    }
}

/// Errors from the schema migrator. Non-recoverable: startup refuses to serve.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("database error while applying migration {version}: {source}")]
    Database {
        version: i64,
        #[source]
        source: libsql::Error,
    },
    #[error("migration {version} left the database in an inconsistent state: {detail}")]
    Inconsistent { version: i64, detail: String },
}

/// Errors from the single-writer accessor.
#[derive(Debug, thiserror::Error)]
pub enum AccessorError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("writer task is not accepting work (shutting down)")]
    WriterUnavailable,
    #[error("operation cancelled before it ran")]
    Cancelled,
}

/// Errors from the memory store (spec §4.3).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("memory {id} not found")]
    NotFound { id: String },
    #[error("memory {id} version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: i64,
        actual: i64,
    },
    #[error("memory {id} is soft-deleted")]
    Deleted { id: String },
    #[error("memory {id} is pinned and requires force=true to delete")]
    PinnedRequiresForce { id: String },
    #[error("mutations are frozen or writes are disabled")]
    Forbidden,
    #[error("database error: {0}")]
    Database(#[from] AccessorError),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { id } => AppError::new(ErrorCode::NotFound, format!("memory {id} not found")),
            StoreError::VersionConflict { id, expected, actual } => AppError::new(
                ErrorCode::VersionConflict,
                format!("memory {id}: expected version {expected}, current version {actual}"),
            ),
            StoreError::Deleted { id } => {
                AppError::new(ErrorCode::Deleted, format!("memory {id} is deleted"))
            }
            StoreError::PinnedRequiresForce { id } => AppError::new(
                ErrorCode::PinnedRequiresForce,
                format!("memory {id} is pinned; pass force=true"),
            ),
            StoreError::Forbidden => {
                AppError::new(ErrorCode::Forbidden, "writes are disabled by pipeline config")
            }
            StoreError::InvalidPayload(msg) => AppError::new(ErrorCode::InvalidPayload, msg),
            StoreError::Database(e) => AppError::internal(e.to_string()),
        }
    }
}

/// Errors from the job queue (spec §4.8).
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job {id} not found")]
    NotFound { id: String },
    #[error("job {id} lease mismatch: held lease does not match")]
    LeaseMismatch { id: String },
    #[error("database error: {0}")]
    Database(#[from] AccessorError),
}

impl From<JobError> for AppError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::NotFound { id } => AppError::new(ErrorCode::NotFound, format!("job {id} not found")),
            JobError::LeaseMismatch { id } => {
                AppError::new(ErrorCode::VersionConflict, format!("job {id} lease mismatch"))
            }
            JobError::Database(e) => AppError::internal(e.to_string()),
        }
    }
}

/// Errors from the signing layer (spec §4.4). Verification failure is
/// non-fatal to reads; callers treat it as "unverified", not an error.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("field '{field}' must not contain the '|' separator")]
    InvalidField { field: &'static str },
    #[error("no signing keypair is configured")]
    NoKeypair,
    #[error("signature encoding error: {0}")]
    Encoding(String),
}

/// Errors from the recall engine (spec §4.6).
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error("database error: {0}")]
    Database(#[from] AccessorError),
    #[error("embedder collaborator failed: {0}")]
    Embedder(String),
    #[error("reranker timed out")]
    RerankerTimeout,
}

impl From<RecallError> for AppError {
    fn from(e: RecallError) -> Self {
        match e {
            RecallError::Database(e) => AppError::internal(e.to_string()),
            RecallError::Embedder(msg) => AppError::internal(msg),
            RecallError::RerankerTimeout => AppError::new(ErrorCode::Timeout, "reranker timed out"),
        }
    }
}

/// Errors from the entity graph (spec §4.7).
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("database error: {0}")]
    Database(#[from] AccessorError),
}

/// Errors from the Generator/Embedder collaborators (spec §1, out of scope
/// for this repo's own logic, but the HTTP call still needs a real error type).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("no collaborator configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Request(String),
    #[error("response could not be parsed: {0}")]
    InvalidResponse(String),
}

/// Errors from the session registry (spec §4.10).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {session_key} is already claimed by runtime path '{existing}'")]
    AlreadyClaimed { session_key: String, existing: String },
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::AlreadyClaimed { session_key, existing } => AppError::new(
                ErrorCode::VersionConflict,
                format!("session {session_key} is already claimed by runtime path '{existing}'"),
            ),
        }
    }
}

/// Errors surfaced by workspace/document ingestion.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read source file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Database(#[from] AccessorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_expected_status() {
        assert_eq!(ErrorCode::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::VersionConflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::Deleted.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(
            ErrorCode::PinnedRequiresForce.status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(ErrorCode::Forbidden.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorCode::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ErrorCode::InvalidPayload.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_error_converts_with_stable_code() {
        let err: AppError = StoreError::PinnedRequiresForce { id: "m1".into() }.into();
        assert_eq!(err.code, ErrorCode::PinnedRequiresForce);
    }
}
