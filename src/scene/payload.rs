//! Scene creation wire types
//!
//! Field names follow the remote API exactly; everything here is a
//! read-only snapshot assembled at finalize time.

use serde::{Deserialize, Serialize};

use crate::upload::{ChannelMeta, ChannelStatus};

/// Per-track active durations, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDurations {
    pub screen: u64,
    pub camera: u64,
}

/// Which track's audio feeds captions/transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionSource {
    Screen,
    Camera,
}

/// A pointer interaction captured during the recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenDimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDimensions {
    pub width: u32,
    pub height: u32,
    pub flip: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDimensions {
    pub screen: Option<ScreenDimensions>,
    pub camera: Option<CameraDimensions>,
}

/// Everything the upload pipeline produced for one session, captured when
/// recording stops. Also the shape persisted for failure diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMeta {
    pub scene_id: Option<String>,
    pub screen: Option<ChannelMeta>,
    pub camera: Option<ChannelMeta>,
    pub audio_media_id: Option<String>,
    pub new_project: bool,
}

impl UploadMeta {
    fn channel_is_valid(meta: &Option<ChannelMeta>) -> bool {
        meta.as_ref()
            .is_some_and(|m| m.status == ChannelStatus::Completed && m.media_id.is_some())
    }

    /// Screen media completed its upload and has a remote identity.
    pub fn has_valid_screen(&self) -> bool {
        Self::channel_is_valid(&self.screen)
    }

    pub fn has_valid_camera(&self) -> bool {
        Self::channel_is_valid(&self.camera)
    }

    /// Every remote media id known to have been created this session,
    /// regardless of whether its upload completed.
    pub fn known_media_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for meta in [&self.screen, &self.camera] {
            if let Some(id) = meta.as_ref().and_then(|m| m.media_id.clone()) {
                ids.push(id);
            }
        }
        if let Some(id) = &self.audio_media_id {
            ids.push(id.clone());
        }
        ids
    }
}

/// Scene-creation request body, exactly as the remote API expects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenePayload {
    pub scene_id: String,
    pub screen_media_id: Option<String>,
    pub camera_media_id: Option<String>,
    pub screen_video_id: Option<String>,
    pub camera_video_id: Option<String>,
    pub audio_media_id: Option<String>,
    pub durations: TrackDurations,
    pub caption_source: Option<CaptionSource>,
    pub transcription_source_media_id: Option<String>,
    pub thumbnail: Option<String>,
    pub dimensions: SceneDimensions,
    pub click_events: Vec<ClickEvent>,
    pub surface: Option<String>,
    pub instant_mode: bool,
    pub new_project: bool,
    pub insert_after_scene_id: Option<String>,
    pub is_tab: bool,
    pub domain: Option<String>,
}
