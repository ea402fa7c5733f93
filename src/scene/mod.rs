//! Scene assembly and reconciliation
//!
//! After finalize, the reconciler turns upload results into a scene
//! record; after failure, it deletes whatever remote media was created.

pub mod api;
pub mod payload;
pub mod reconciler;

pub use api::{ApiError, HttpProjectApi, MediaDeletion, ProjectApi, ProjectInfo, SceneResult};
pub use payload::{
    CameraDimensions, CaptionSource, ClickEvent, SceneDimensions, ScenePayload, ScreenDimensions,
    TrackDurations, UploadMeta,
};
pub use reconciler::{SceneError, SceneExtras, SceneReconciler};
