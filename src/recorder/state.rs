//! Session state machine types
//!
//! The lifecycle is an explicit enumerated state with a transition table,
//! so an illegal transition is rejected at one place instead of leaking
//! through scattered boolean guards.

use serde::{Deserialize, Serialize};

use crate::capture::SourceSelector;

/// Lifecycle state of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No recording in progress.
    Idle,
    /// Acquiring streams and allocating remote upload targets.
    Initializing,
    /// Streams live, encoders not yet started.
    Streaming,
    Recording,
    Paused,
    /// Draining uploads and creating the scene.
    Finalizing,
    /// Discarding the recording.
    Dismissing,
    /// Discarding the recording to start over.
    Restarting,
    Completed,
    Failed,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    /// Whether a transition to `next` is legal.
    pub fn allows(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Initializing) => true,
            (Restarting, Initializing) => true,
            (Initializing, Streaming) => true,
            // Any failure during initialization rolls back to Idle.
            (Initializing, Idle) => true,
            (Streaming, Recording) => true,
            (Recording, Paused) => true,
            (Paused, Recording) => true,
            (Recording | Paused, Finalizing) => true,
            // stop(finalize=false) hands the session back without a scene.
            (Recording | Paused, Idle) => true,
            (Streaming | Recording | Paused, Dismissing | Restarting) => true,
            (Initializing, Dismissing | Restarting) => true,
            (Finalizing, Completed | Failed) => true,
            (Dismissing, Idle) => true,
            _ => false,
        }
    }

    /// States in which a recording is underway or being set up.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Initializing
                | SessionState::Streaming
                | SessionState::Recording
                | SessionState::Paused
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Screen source description in a session request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenSource {
    pub selector: SourceSelector,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSource {
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    /// Mirror the camera image in the final scene.
    pub flip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSource {
    pub device_id: String,
}

/// Request describing what to record and where it lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub title: String,
    pub screen: Option<ScreenSource>,
    pub camera: Option<CameraSource>,
    pub audio: Option<AudioSource>,

    /// Existing project to record into; a new one is created when absent.
    pub project_id: Option<String>,
    /// Destination scene when re-recording into an existing scene.
    pub scene_id: Option<String>,
    pub insert_after_scene_id: Option<String>,

    pub instant_mode: bool,
    pub multi_mode: bool,

    pub surface: Option<String>,
    pub domain: Option<String>,
    pub is_tab: bool,

    /// Overrides the default recording duration limit, in milliseconds.
    pub max_duration_ms: Option<u64>,
}

/// Default hard limit on recording duration.
pub const DEFAULT_MAX_DURATION_MS: u64 = 60 * 60 * 1000;

/// Remaining-time threshold for the time warning.
pub const WARNING_THRESHOLD_MS: u64 = 60 * 1000;

/// Session-level policy, fixed at initialization and never mutated after
/// the session reaches `Streaming`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub instant_mode: bool,
    /// The recording targets an existing scene; dismissal must not touch
    /// the destination scene or its project.
    pub recording_to_scene: bool,
    pub multi_mode: bool,
    pub max_duration_ms: u64,
    pub warning_threshold_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instant_mode: false,
            recording_to_scene: false,
            multi_mode: false,
            max_duration_ms: DEFAULT_MAX_DURATION_MS,
            warning_threshold_ms: WARNING_THRESHOLD_MS,
        }
    }
}

impl SessionConfig {
    pub fn from_request(request: &SessionRequest) -> Self {
        Self {
            instant_mode: request.instant_mode,
            recording_to_scene: request.scene_id.is_some(),
            multi_mode: request.multi_mode,
            max_duration_ms: request.max_duration_ms.unwrap_or(DEFAULT_MAX_DURATION_MS),
            warning_threshold_ms: WARNING_THRESHOLD_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path_transitions() {
        for (from, to) in [
            (Idle, Initializing),
            (Initializing, Streaming),
            (Streaming, Recording),
            (Recording, Paused),
            (Paused, Recording),
            (Recording, Finalizing),
            (Finalizing, Completed),
        ] {
            assert!(from.allows(to), "{from:?} -> {to:?} should be legal");
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        for (from, to) in [
            (Idle, Recording),
            (Streaming, Paused),
            (Completed, Recording),
            (Failed, Finalizing),
            (Dismissing, Finalizing),
            (Finalizing, Recording),
        ] {
            assert!(!from.allows(to), "{from:?} -> {to:?} should be illegal");
        }
    }

    #[test]
    fn test_restart_reenters_initializing() {
        assert!(Recording.allows(Restarting));
        assert!(Restarting.allows(Initializing));
    }

    #[test]
    fn test_config_from_request() {
        let request = SessionRequest {
            title: "demo".into(),
            screen: None,
            camera: None,
            audio: None,
            project_id: Some("project-1".into()),
            scene_id: Some("scene-1".into()),
            insert_after_scene_id: None,
            instant_mode: true,
            multi_mode: false,
            surface: None,
            domain: None,
            is_tab: false,
            max_duration_ms: Some(5_000),
        };
        let config = SessionConfig::from_request(&request);
        assert!(config.recording_to_scene);
        assert!(config.instant_mode);
        assert_eq!(config.max_duration_ms, 5_000);
    }
}
