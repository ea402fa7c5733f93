//! HTTP implementation of the resumable upload target
//!
//! Speaks a TUS-style protocol: creation returns an upload URL, chunk
//! appends are PATCH requests carrying the expected byte offset, and the
//! server answers with the new offset.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;

use super::target::{TargetError, UploadDescriptor, UploadHandle, UploadTarget};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const OFFSET_HEADER: &str = "Upload-Offset";
const CHUNK_CONTENT_TYPE: &str = "application/offset+octet-stream";

pub struct HttpUploadTarget {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    media_id: String,
    video_id: String,
    upload_url: String,
}

impl HttpUploadTarget {
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

    fn transport_error(e: reqwest::Error) -> TargetError {
        if e.is_timeout() {
            TargetError::Timeout
        } else {
            TargetError::Network(e.to_string())
        }
    }

    async fn status_error(resp: reqwest::Response) -> TargetError {
        let status = resp.status();
        match status.as_u16() {
            401 => TargetError::Authentication,
            429 => TargetError::RateLimit,
            code => {
                let message = resp.text().await.unwrap_or_default();
                TargetError::Rejected { status: code, message }
            }
        }
    }
}

#[async_trait]
impl UploadTarget for HttpUploadTarget {
    async fn create(
        &self,
        project_id: &str,
        descriptor: &UploadDescriptor,
    ) -> Result<UploadHandle, TargetError> {
        let url = format!("{}/projects/{}/uploads", self.base_url, project_id);
        let resp = self
            .client
            .post(&url)
            .json(descriptor)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !resp.status().is_success() {
            return Err(Self::status_error(resp).await);
        }

        let body: CreateResponse = resp
            .json()
            .await
            .map_err(|e| TargetError::Other(format!("malformed create response: {e}")))?;

        Ok(UploadHandle {
            media_id: body.media_id,
            video_id: body.video_id,
            upload_url: body.upload_url,
        })
    }

    async fn append_chunk(
        &self,
        handle: &UploadHandle,
        offset: u64,
        chunk: &[u8],
    ) -> Result<u64, TargetError> {
        let resp = self
            .client
            .patch(&handle.upload_url)
            .header(OFFSET_HEADER, offset)
            .header(CONTENT_TYPE, CHUNK_CONTENT_TYPE)
            .body(chunk.to_vec())
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !resp.status().is_success() {
            return Err(Self::status_error(resp).await);
        }

        resp.headers()
            .get(OFFSET_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                TargetError::Other("missing Upload-Offset header in append response".into())
            })
    }

    async fn complete(&self, handle: &UploadHandle) -> Result<(), TargetError> {
        let url = format!("{}/complete", handle.upload_url);
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !resp.status().is_success() {
            return Err(Self::status_error(resp).await);
        }
        Ok(())
    }

    async fn abort(&self, handle: &UploadHandle) -> Result<(), TargetError> {
        let resp = self
            .client
            .delete(&handle.upload_url)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !resp.status().is_success() {
            return Err(Self::status_error(resp).await);
        }
        Ok(())
    }
}
