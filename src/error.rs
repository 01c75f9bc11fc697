//! Error Types
//!
//! Mirrors the error-kind taxonomy of the log-store subsystem: not found,
//! validation, auth, config, storage, serialization, and cancellation.

/// Errors surfaced by the store, migrator, and async job executor.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("auth error: {0}")]
    AuthError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageError(_) | Self::Cancelled)
    }

    /// HTTP-style status code for surfacing at the edge, mirroring the
    /// job-record `status_code` convention in `AsyncJob`.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::ValidationError(_) => 400,
            Self::AuthError(_) => 401,
            Self::ConfigError(_) => 500,
            Self::StorageError(_) => 500,
            Self::SerializationError(_) => 500,
            Self::Cancelled => 499,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
