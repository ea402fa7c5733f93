//! Session event bus
//!
//! Best-effort notifications to the host UI. Delivery is not required for
//! correctness of the state machine; a bus with no subscribers drops
//! events silently.

use tokio::sync::broadcast;

/// Events emitted on state transitions.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started,
    Paused,
    Resumed,
    /// Remaining recording time dropped below the warning threshold.
    TimeWarning { remaining_ms: u64 },
    /// The finalized scene is available remotely.
    VideoReady { scene_id: String },
    /// The destination project exists; the host can open its editor.
    EditorReady { project_id: String },
    RecordingError(String),
    /// The periodic auth revalidation failed.
    SessionCheckFailed(String),
    Dismissed { restarting: bool },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
