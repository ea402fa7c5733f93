//! Per-track recording state

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::capture::{ChunkEncoder, StreamHandle, TrackKind};
use crate::recorder::timer::Timer;
use crate::upload::{ChunkSink, UploadChannel};

/// Consecutive chunk-upload failures beyond this force a session stop.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Consecutive upload-failure counter, reset on any successful chunk.
#[derive(Debug, Default)]
pub struct ConsecutiveFailures(AtomicU32);

impl ConsecutiveFailures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure and return the new streak length.
    pub fn record_failure(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn exceeded(&self) -> bool {
        self.get() > MAX_CONSECUTIVE_FAILURES
    }
}

/// Everything one live track owns.
///
/// A track with no underlying stream never exists; a track without an
/// upload channel (audio) still carries a timer and spool.
pub struct TrackState {
    pub kind: TrackKind,
    pub stream: StreamHandle,
    pub encoder: Arc<dyn ChunkEncoder>,
    pub channel: Option<Arc<UploadChannel>>,
    pub sink: Option<Arc<ChunkSink>>,
    pub timer: Arc<Timer>,
    pub failures: Arc<ConsecutiveFailures>,
}

/// The session's tracks, at most one per kind.
#[derive(Default)]
pub struct TrackSet {
    pub screen: Option<TrackState>,
    pub camera: Option<TrackState>,
    pub audio: Option<TrackState>,
}

impl TrackSet {
    pub fn get(&self, kind: TrackKind) -> Option<&TrackState> {
        match kind {
            TrackKind::Screen => self.screen.as_ref(),
            TrackKind::Camera => self.camera.as_ref(),
            TrackKind::Audio => self.audio.as_ref(),
        }
    }

    pub fn insert(&mut self, track: TrackState) {
        let slot = match track.kind {
            TrackKind::Screen => &mut self.screen,
            TrackKind::Camera => &mut self.camera,
            TrackKind::Audio => &mut self.audio,
        };
        debug_assert!(slot.is_none(), "duplicate {} track", track.kind);
        *slot = Some(track);
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackState> {
        [self.screen.as_ref(), self.camera.as_ref(), self.audio.as_ref()]
            .into_iter()
            .flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn clear(&mut self) {
        self.screen = None;
        self.camera = None;
        self.audio = None;
    }
}
