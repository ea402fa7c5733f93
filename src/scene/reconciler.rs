//! Scene assembly, submission, and failure reconciliation
//!
//! Validates upload completeness, builds the scene-creation request, and
//! on partial failure deletes whatever remote media this session created.

use std::sync::Arc;
use thiserror::Error;

use super::api::{ApiError, MediaDeletion, ProjectApi, SceneResult};
use super::payload::{
    CameraDimensions, CaptionSource, ClickEvent, SceneDimensions, ScenePayload, ScreenDimensions,
    TrackDurations, UploadMeta,
};

#[derive(Debug, Error)]
pub enum SceneError {
    /// Finalize attempted with no usable media. Fatal for the session.
    #[error("cannot create a scene: {0}")]
    Validation(String),

    #[error("scene submission failed: {0}")]
    Submission(#[from] ApiError),
}

/// Host-provided context that rides along into the scene payload.
#[derive(Debug, Clone, Default)]
pub struct SceneExtras {
    pub thumbnail: Option<String>,
    pub click_events: Vec<ClickEvent>,
    pub surface: Option<String>,
    pub domain: Option<String>,
    pub is_tab: bool,
    pub instant_mode: bool,
    pub insert_after_scene_id: Option<String>,
    /// False when silence detection ruled out a transcript.
    pub transcript_eligible: bool,
    pub camera_flip: bool,
}

pub struct SceneReconciler {
    api: Arc<dyn ProjectApi>,
}

impl SceneReconciler {
    pub fn new(api: Arc<dyn ProjectApi>) -> Self {
        Self { api }
    }

    /// Build the scene-creation request from upload results.
    ///
    /// Requires a scene id and at least one completed screen or camera
    /// upload; anything less is a `Validation` error.
    pub fn assemble(
        meta: &UploadMeta,
        durations: TrackDurations,
        extras: &SceneExtras,
    ) -> Result<ScenePayload, SceneError> {
        let Some(scene_id) = meta.scene_id.clone() else {
            return Err(SceneError::Validation("missing scene id".into()));
        };

        let has_screen = meta.has_valid_screen();
        let has_camera = meta.has_valid_camera();
        if !has_screen && !has_camera {
            return Err(SceneError::Validation(
                "no completed screen or camera media".into(),
            ));
        }

        // The camera carries the narration mic when it survived; the
        // screen track is the fallback.
        let caption_source = if has_camera {
            CaptionSource::Camera
        } else {
            CaptionSource::Screen
        };

        let screen = meta.screen.as_ref().filter(|_| has_screen);
        let camera = meta.camera.as_ref().filter(|_| has_camera);

        let transcription_source_media_id = if extras.transcript_eligible {
            match caption_source {
                CaptionSource::Camera => camera.and_then(|m| m.media_id.clone()),
                CaptionSource::Screen => screen.and_then(|m| m.media_id.clone()),
            }
        } else {
            None
        };

        Ok(ScenePayload {
            scene_id,
            screen_media_id: screen.and_then(|m| m.media_id.clone()),
            camera_media_id: camera.and_then(|m| m.media_id.clone()),
            screen_video_id: screen.and_then(|m| m.video_id.clone()),
            camera_video_id: camera.and_then(|m| m.video_id.clone()),
            audio_media_id: meta.audio_media_id.clone(),
            durations,
            caption_source: Some(caption_source),
            transcription_source_media_id,
            thumbnail: extras.thumbnail.clone(),
            dimensions: SceneDimensions {
                screen: screen.map(|m| ScreenDimensions {
                    width: m.width,
                    height: m.height,
                }),
                camera: camera.map(|m| CameraDimensions {
                    width: m.width,
                    height: m.height,
                    flip: extras.camera_flip,
                }),
            },
            click_events: extras.click_events.clone(),
            surface: extras.surface.clone(),
            instant_mode: extras.instant_mode,
            new_project: meta.new_project,
            insert_after_scene_id: extras.insert_after_scene_id.clone(),
            is_tab: extras.is_tab,
            domain: extras.domain.clone(),
        })
    }

    /// Post the scene to the project API. Scene creation is never
    /// retried; only chunk uploads are.
    pub async fn submit(
        &self,
        project_id: &str,
        payload: &ScenePayload,
    ) -> Result<SceneResult, SceneError> {
        let result = self.api.create_scene(project_id, payload).await?;
        tracing::info!("scene created: {}", result.scene_id);
        Ok(result)
    }

    /// Delete every remote media id this session created, so a failed or
    /// dismissed recording never leaves orphaned remote storage.
    pub async fn reconcile_on_failure(
        &self,
        project_id: &str,
        meta: &UploadMeta,
        delete_whole_project: bool,
    ) -> Result<(), ApiError> {
        let media_ids = meta.known_media_ids();
        if media_ids.is_empty() && !delete_whole_project {
            tracing::debug!("no remote media to reconcile");
            return Ok(());
        }

        tracing::info!(
            "reconciling failed recording: deleting {} media id(s), whole_project={}",
            media_ids.len(),
            delete_whole_project
        );

        self.api
            .delete_media(
                project_id,
                &MediaDeletion {
                    media_ids,
                    delete_whole_project,
                },
            )
            .await
    }
}
