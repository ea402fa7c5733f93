//! Capture collaborator boundary
//!
//! Raw media capture lives in the host; this module defines the traits the
//! pipeline consumes.

pub mod traits;

pub use traits::{
    CaptureError, CaptureResult, CaptureSource, ChunkEncoder, EncoderEvent, EncoderFactory,
    SourceSelector, StreamHandle, TrackKind,
};
