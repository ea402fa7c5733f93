//! Recording session module
//!
//! The session state machine and the pieces it owns: per-track timers,
//! the event bus, and the keep-alive monitor.

pub mod events;
pub mod keepalive;
pub mod session;
pub mod state;
pub mod timer;
pub mod track;

pub use events::{EventBus, SessionEvent};
pub use keepalive::{AuthProbe, AuthStatus, KeepAliveMonitor, KEEP_ALIVE_PERIOD};
pub use session::{RecordingSession, SessionDeps, StopOutcome, CHUNK_CADENCE};
pub use state::{
    AudioSource, CameraSource, ScreenSource, SessionConfig, SessionRequest, SessionState,
};
pub use timer::Timer;
pub use track::{ConsecutiveFailures, TrackSet, TrackState, MAX_CONSECUTIVE_FAILURES};
