//! Remote project API collaborator
//!
//! Scenes are append-only records inside a project; deletion exists only
//! so a failed or dismissed recording never leaves orphaned media behind.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::payload::ScenePayload;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout")]
    Timeout,

    #[error("authentication failed")]
    Authentication,

    #[error("project API rejected request: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub project_id: String,
}

/// Successful scene creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneResult {
    pub scene_id: String,
}

/// Media-deletion request for a failed or dismissed recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDeletion {
    /// Every remote media id created during the session.
    pub media_ids: Vec<String>,
    /// Also remove the project itself (abandoned new project).
    pub delete_whole_project: bool,
}

#[async_trait]
pub trait ProjectApi: Send + Sync {
    /// Allocate a project for a recording that is not targeting an
    /// existing one.
    async fn create_project(&self, title: &str) -> Result<ProjectInfo, ApiError>;

    /// `POST /videos/:id/scenes`
    async fn create_scene(
        &self,
        project_id: &str,
        payload: &ScenePayload,
    ) -> Result<SceneResult, ApiError>;

    /// `POST /videos/:id/delete`
    async fn delete_media(
        &self,
        project_id: &str,
        deletion: &MediaDeletion,
    ) -> Result<(), ApiError>;
}

pub struct HttpProjectApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProjectApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn transport_error(e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(e.to_string())
        }
    }

    async fn status_error(resp: reqwest::Response) -> ApiError {
        let status = resp.status();
        match status.as_u16() {
            401 => ApiError::Authentication,
            code => {
                let message = resp.text().await.unwrap_or_default();
                ApiError::Rejected { status: code, message }
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectRequest<'a> {
    title: &'a str,
}

#[async_trait]
impl ProjectApi for HttpProjectApi {
    async fn create_project(&self, title: &str) -> Result<ProjectInfo, ApiError> {
        let url = format!("{}/videos", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&CreateProjectRequest { title })
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !resp.status().is_success() {
            return Err(Self::status_error(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| ApiError::Network(format!("malformed project response: {e}")))
    }

    async fn create_scene(
        &self,
        project_id: &str,
        payload: &ScenePayload,
    ) -> Result<SceneResult, ApiError> {
        let url = format!("{}/videos/{}/scenes", self.base_url, project_id);
        let resp = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !resp.status().is_success() {
            return Err(Self::status_error(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| ApiError::Network(format!("malformed scene response: {e}")))
    }

    async fn delete_media(
        &self,
        project_id: &str,
        deletion: &MediaDeletion,
    ) -> Result<(), ApiError> {
        let url = format!("{}/videos/{}/delete", self.base_url, project_id);
        let resp = self
            .client
            .post(&url)
            .json(deletion)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !resp.status().is_success() {
            return Err(Self::status_error(resp).await);
        }
        Ok(())
    }
}
