//! Resumable upload pipeline
//!
//! - ChunkSink spools chunks locally before upload
//! - UploadChannel serializes ordered, retried chunk appends per track
//! - UploadTarget is the remote resumable primitive, with an HTTP impl

pub mod channel;
pub mod http;
pub mod retry;
pub mod sink;
pub mod target;

pub use channel::{ChannelMeta, ChannelStatus, InitializationError, UploadChannel, UploadError};
pub use http::HttpUploadTarget;
pub use retry::RetryPolicy;
pub use sink::ChunkSink;
pub use target::{TargetError, UploadDescriptor, UploadHandle, UploadTarget};
