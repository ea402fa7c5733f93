//! Capture collaborator traits
//!
//! The pipeline treats media acquisition and encoding as black boxes: a
//! capture source hands out live stream handles, an encoder turns a stream
//! into a sequence of ordered chunks plus a terminal stop event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised while acquiring or encoding media.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("capture source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("encoder error: {0}")]
    Encoder(String),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// One independently captured/encoded/uploaded media source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Screen,
    Camera,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Screen => write!(f, "screen"),
            TrackKind::Camera => write!(f, "camera"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Which surface a screen recording captures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SourceSelector {
    /// A whole display.
    Display { display_id: u32 },
    /// A single window.
    Window { window_id: u32 },
    /// A rectangular region of a display.
    Region {
        display_id: u32,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    /// The host's current tab.
    Tab,
}

/// Handle to a live media source. Opaque to the pipeline beyond identity
/// and dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub id: String,
    pub kind: TrackKind,
    pub width: u32,
    pub height: u32,
}

/// Events emitted by a chunk encoder.
#[derive(Debug)]
pub enum EncoderEvent {
    /// An encoded media chunk, in arrival order.
    Chunk(Vec<u8>),
    /// The encoder stopped; no further chunks will arrive.
    Stopped,
}

/// Produces live stream handles and a termination signal per source.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn acquire_screen(
        &self,
        selector: &SourceSelector,
        width: u32,
        height: u32,
    ) -> CaptureResult<StreamHandle>;

    async fn acquire_camera(
        &self,
        device_id: &str,
        width: u32,
        height: u32,
    ) -> CaptureResult<StreamHandle>;

    async fn acquire_audio(&self, device_id: &str) -> CaptureResult<StreamHandle>;

    /// Release a previously acquired stream.
    async fn release(&self, stream: &StreamHandle);
}

/// Encodes one stream into periodic chunks.
///
/// Implementations manage their own interior state; all methods take
/// `&self` so handles can be shared across tasks.
#[async_trait]
pub trait ChunkEncoder: Send + Sync {
    /// Begin encoding. Chunks arrive on the returned receiver at the given
    /// cadence; a terminal [`EncoderEvent::Stopped`] follows `stop()` or a
    /// source-side termination.
    async fn start(
        &self,
        stream: &StreamHandle,
        cadence: Duration,
    ) -> CaptureResult<mpsc::Receiver<EncoderEvent>>;

    async fn pause(&self) -> CaptureResult<()>;

    async fn resume(&self) -> CaptureResult<()>;

    async fn stop(&self) -> CaptureResult<()>;
}

/// Builds an encoder for an acquired stream.
pub trait EncoderFactory: Send + Sync {
    fn encoder_for(&self, stream: &StreamHandle) -> std::sync::Arc<dyn ChunkEncoder>;
}
