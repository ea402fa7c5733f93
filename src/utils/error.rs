//! Error types and handling
//!
//! Module errors live next to the code that raises them; this is the
//! crate-wide aggregation plus the host-facing response shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::CaptureError;
use crate::scene::{ApiError, SceneError};
use crate::storage::StorageError;
use crate::upload::{InitializationError, UploadError};

/// Top-level error for session operations.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Capture source unavailable or denied. Not retryable; the session
    /// stays idle.
    #[error("capture acquisition failed: {0}")]
    Acquisition(#[from] CaptureError),

    /// Project or upload-target setup failed. Retryable by re-running the
    /// whole start path.
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid session state: {0}")]
    InvalidState(String),
}

impl From<InitializationError> for RecorderError {
    fn from(e: InitializationError) -> Self {
        RecorderError::Initialization(e.to_string())
    }
}

impl From<ApiError> for RecorderError {
    fn from(e: ApiError) -> Self {
        RecorderError::Initialization(e.to_string())
    }
}

/// Error response for the host UI.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        let code = match &error {
            RecorderError::Acquisition(_) => "ACQUISITION_ERROR",
            RecorderError::Initialization(_) => "INITIALIZATION_ERROR",
            RecorderError::Upload(_) => "UPLOAD_ERROR",
            RecorderError::Scene(SceneError::Validation(_)) => "VALIDATION_ERROR",
            RecorderError::Scene(SceneError::Submission(_)) => "SCENE_SUBMISSION_ERROR",
            RecorderError::Storage(_) => "STORAGE_ERROR",
            RecorderError::InvalidState(_) => "INVALID_STATE",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = RecorderError::Scene(SceneError::Validation("no media".into()));
        let response = ErrorResponse::from(err);
        assert_eq!(response.code, "VALIDATION_ERROR");
        assert!(response.message.contains("no media"));

        let err = RecorderError::InvalidState("cannot stop while idle".into());
        assert_eq!(ErrorResponse::from(err).code, "INVALID_STATE");
    }
}
