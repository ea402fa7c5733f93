//! Resumable upload target contract
//!
//! The remote store exposes a minimal resumable primitive: allocate a
//! target, append ordered chunks against a byte offset, complete or abort.
//! The wire protocol behind it is an implementation detail of the target.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::TrackKind;

/// Errors surfaced by an upload target, with retry classification.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout")]
    Timeout,

    #[error("authentication failed")]
    Authentication,

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("upload target rejected request: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("upload target error: {0}")]
    Other(String),
}

impl TargetError {
    /// Returns true if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            TargetError::Network(_) | TargetError::Timeout | TargetError::RateLimit => true,
            TargetError::Rejected { status, .. } => *status >= 500,
            TargetError::Authentication | TargetError::Other(_) => false,
        }
    }
}

/// Descriptor sent when allocating a remote upload target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDescriptor {
    /// Logical title of the recording.
    pub title: String,

    /// Which track this target receives.
    pub kind: TrackKind,

    /// Target dimensions. Zero dimensions are rejected at initialization.
    pub width: u32,
    pub height: u32,

    /// Companion track's media id (camera links to screen).
    pub linked_media_id: Option<String>,

    /// Scene this media belongs to.
    pub scene_id: String,
}

/// Remote identifiers assigned when a target is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHandle {
    pub media_id: String,
    pub video_id: String,
    /// Endpoint accepting chunk appends for this target.
    pub upload_url: String,
}

/// Remote-side resumable upload primitive.
#[async_trait]
pub trait UploadTarget: Send + Sync {
    /// Allocate a remote upload target inside a project.
    async fn create(
        &self,
        project_id: &str,
        descriptor: &UploadDescriptor,
    ) -> Result<UploadHandle, TargetError>;

    /// Append one chunk at the given byte offset; returns the new offset.
    async fn append_chunk(
        &self,
        handle: &UploadHandle,
        offset: u64,
        chunk: &[u8],
    ) -> Result<u64, TargetError>;

    /// Signal end-of-stream for the target.
    async fn complete(&self, handle: &UploadHandle) -> Result<(), TargetError>;

    /// Cancel the target and discard its remote state.
    async fn abort(&self, handle: &UploadHandle) -> Result<(), TargetError>;
}
