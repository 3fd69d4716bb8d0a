use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by the storage engine and its collaborators.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage object `{0}` was not found")]
    ObjectNotFound(Uuid),
    #[error("storage object group `{0}` was not found")]
    GroupNotFound(String),
    #[error("storage object `{0}` is locked, please try again later")]
    Locked(Uuid),
    #[error("the object is encrypted and requires an encryption key")]
    KeyRequired,
    #[error("could not decrypt the object: wrong encryption key or corrupted content")]
    DecryptionFailed,
    #[error("could not perform the I/O operation on the internal storage")]
    Storage(#[source] io::Error),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("duplicate metadata property `{0}`")]
    DuplicateMetadataKey(String),
    #[error("storage object group `{0}` already exists")]
    DuplicateGroupName(String),
    #[error("declared content length {expected} does not match received {actual} bytes")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("an empty upload cannot be encrypted")]
    NothingToEncrypt,
    #[error("upload stream failed")]
    UploadInterrupted(#[source] io::Error),
    #[error("encryption failure: {0}")]
    Encryption(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl StorageError {
    /// HTTP status the error surfaces as.
    pub fn status(&self) -> StatusCode {
        match self {
            StorageError::ObjectNotFound(_) | StorageError::GroupNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StorageError::Locked(_) => StatusCode::LOCKED,
            StorageError::KeyRequired
            | StorageError::InvalidName(_)
            | StorageError::DuplicateMetadataKey(_)
            | StorageError::LengthMismatch { .. }
            | StorageError::NothingToEncrypt
            | StorageError::UploadInterrupted(_) => StatusCode::BAD_REQUEST,
            StorageError::DecryptionFailed => StatusCode::UNPROCESSABLE_ENTITY,
            StorageError::DuplicateGroupName(_) => StatusCode::CONFLICT,
            StorageError::Storage(_) | StorageError::Encryption(_) | StorageError::Sqlx(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            match std::error::Error::source(&err) {
                Some(source) => tracing::error!("{}: {}", err, source),
                None => tracing::error!("{}", err),
            }
        }
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_faults_map_to_4xx() {
        assert_eq!(StorageError::Locked(Uuid::nil()).status(), StatusCode::LOCKED);
        assert_eq!(StorageError::KeyRequired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            StorageError::DuplicateGroupName("images".into()).status(),
            StatusCode::CONFLICT
        );
        assert!(StorageError::DecryptionFailed.status().is_client_error());
        assert_eq!(StorageError::NothingToEncrypt.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn storage_faults_map_to_5xx() {
        let err = StorageError::Storage(io::Error::new(io::ErrorKind::Other, "disk gone"));
        let app: AppError = err.into();
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            app.message,
            "could not perform the I/O operation on the internal storage"
        );
    }
}
