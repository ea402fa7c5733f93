//! Resumable upload channel
//!
//! One channel owns the resumable upload session for one media track. All
//! writes funnel through a single writer task consuming an ordered queue,
//! so the remote byte offset always reflects chunk arrival order, even
//! when individual chunks are retried.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};

use super::retry::RetryPolicy;
use super::target::{TargetError, UploadDescriptor, UploadHandle, UploadTarget};

/// Upload channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Uninitialized,
    Initializing,
    Active,
    Paused,
    Finalizing,
    Completed,
    Aborted,
    Errored,
}

/// Errors from channel initialization.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("invalid upload descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("channel already initialized")]
    AlreadyInitialized,

    #[error("upload target allocation failed: {0}")]
    Target(#[from] TargetError),
}

/// Errors from writes and completion.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("chunk upload failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("channel is not accepting writes (status: {status:?})")]
    NotActive { status: ChannelStatus },

    #[error("upload aborted")]
    Aborted,

    #[error("upload completion failed: {0}")]
    Completion(String),
}

/// Snapshot of a channel's remote identity and progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMeta {
    pub media_id: Option<String>,
    pub video_id: Option<String>,
    pub status: ChannelStatus,
    pub offset: u64,
    pub error: Option<String>,
    pub width: u32,
    pub height: u32,
    pub scene_id: Option<String>,
}

struct QueuedChunk {
    bytes: Vec<u8>,
    ack: oneshot::Sender<Result<u64, UploadError>>,
}

struct ChannelState {
    status: ChannelStatus,
    offset: u64,
    handle: Option<UploadHandle>,
    descriptor: Option<UploadDescriptor>,
    error: Option<String>,
}

struct ChannelShared {
    target: Arc<dyn UploadTarget>,
    retry: RetryPolicy,
    state: Mutex<ChannelState>,
    pending: Mutex<usize>,
    drained: Notify,
}

pub struct UploadChannel {
    shared: Arc<ChannelShared>,
    queue: Mutex<Option<mpsc::UnboundedSender<QueuedChunk>>>,
}

impl UploadChannel {
    pub fn new(target: Arc<dyn UploadTarget>) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                target,
                retry: RetryPolicy::default(),
                state: Mutex::new(ChannelState {
                    status: ChannelStatus::Uninitialized,
                    offset: 0,
                    handle: None,
                    descriptor: None,
                    error: None,
                }),
                pending: Mutex::new(0),
                drained: Notify::new(),
            }),
            queue: Mutex::new(None),
        }
    }

    /// Allocate the remote upload target. `Uninitialized → Active`.
    pub async fn initialize(
        &self,
        project_id: &str,
        descriptor: UploadDescriptor,
    ) -> Result<(), InitializationError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(InitializationError::InvalidDescriptor(format!(
                "zero dimensions for {} track",
                descriptor.kind
            )));
        }
        {
            let mut state = self.shared.state.lock();
            if state.status != ChannelStatus::Uninitialized {
                return Err(InitializationError::AlreadyInitialized);
            }
            state.status = ChannelStatus::Initializing;
            state.descriptor = Some(descriptor.clone());
        }

        let handle = match self.shared.target.create(project_id, &descriptor).await {
            Ok(handle) => handle,
            Err(e) => {
                let mut state = self.shared.state.lock();
                state.status = ChannelStatus::Errored;
                state.error = Some(e.to_string());
                return Err(e.into());
            }
        };

        tracing::info!(
            "{} upload target allocated: media={} video={}",
            descriptor.kind,
            handle.media_id,
            handle.video_id
        );

        // The writer drains the queue until every sender is gone; it needs
        // no handle of its own.
        let (tx, rx) = mpsc::unbounded_channel();
        *self.queue.lock() = Some(tx);
        tokio::spawn(Self::writer_loop(self.shared.clone(), rx));

        let mut state = self.shared.state.lock();
        state.handle = Some(handle);
        state.status = ChannelStatus::Active;
        Ok(())
    }

    /// Append one chunk. Resolves once the chunk is durably accepted
    /// remotely, or fails after the bounded retry budget.
    ///
    /// A write while `Paused` is a no-op that leaves the offset untouched.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<u64, UploadError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let state = self.shared.state.lock();
            match state.status {
                ChannelStatus::Active => {}
                ChannelStatus::Paused => return Ok(state.offset),
                status => return Err(UploadError::NotActive { status }),
            }
        }

        {
            let queue = self.queue.lock();
            let Some(tx) = queue.as_ref() else {
                return Err(UploadError::Aborted);
            };
            *self.shared.pending.lock() += 1;
            if tx.send(QueuedChunk { bytes, ack: ack_tx }).is_err() {
                let mut pending = self.shared.pending.lock();
                *pending -= 1;
                if *pending == 0 {
                    self.shared.drained.notify_waiters();
                }
                return Err(UploadError::Aborted);
            }
        }

        match ack_rx.await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Aborted),
        }
    }

    /// Resolves when every previously accepted write has completed,
    /// whether it succeeded or exhausted its retries.
    pub async fn wait_for_pending_uploads(&self) {
        loop {
            let notified = self.shared.drained.notified();
            if *self.shared.pending.lock() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting new bytes without tearing anything down.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if state.status == ChannelStatus::Active {
            state.status = ChannelStatus::Paused;
        }
    }

    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        if state.status == ChannelStatus::Paused {
            state.status = ChannelStatus::Active;
        }
    }

    /// Signal end-of-stream to the remote target. Idempotent: a second
    /// call returns the same snapshot without remote side effects.
    ///
    /// The caller drains with [`wait_for_pending_uploads`] first; the
    /// channel does not drain implicitly.
    ///
    /// [`wait_for_pending_uploads`]: UploadChannel::wait_for_pending_uploads
    pub async fn finalize(&self) -> Result<ChannelMeta, UploadError> {
        let handle = {
            let mut state = self.shared.state.lock();
            match state.status {
                ChannelStatus::Completed => return Ok(Self::meta_from(&state)),
                ChannelStatus::Active | ChannelStatus::Paused | ChannelStatus::Errored => {}
                status => return Err(UploadError::NotActive { status }),
            }
            state.status = ChannelStatus::Finalizing;
            state.handle.clone()
        };

        if *self.shared.pending.lock() > 0 {
            tracing::warn!("finalize called with uploads still pending; offset may be short");
        }

        let Some(handle) = handle else {
            return Err(UploadError::NotActive {
                status: ChannelStatus::Uninitialized,
            });
        };

        match self.shared.target.complete(&handle).await {
            Ok(()) => {
                let mut state = self.shared.state.lock();
                state.status = ChannelStatus::Completed;
                tracing::info!(
                    "upload completed: media={} offset={}",
                    handle.media_id,
                    state.offset
                );
                Ok(Self::meta_from(&state))
            }
            Err(e) => {
                let mut state = self.shared.state.lock();
                state.status = ChannelStatus::Errored;
                state.error = Some(e.to_string());
                Err(UploadError::Completion(e.to_string()))
            }
        }
    }

    /// Cancel the remote target and fail any queued writes. Safe from any
    /// state; a no-op once `Completed` or `Aborted`.
    pub async fn abort(&self) {
        let handle = {
            let mut state = self.shared.state.lock();
            match state.status {
                ChannelStatus::Completed | ChannelStatus::Aborted => return,
                _ => {}
            }
            state.status = ChannelStatus::Aborted;
            state.handle.clone()
        };

        // Closing the queue ends the writer loop; chunks still queued are
        // acked with `Aborted` because the loop re-checks status per chunk.
        self.queue.lock().take();

        if let Some(handle) = handle {
            if let Err(e) = self.shared.target.abort(&handle).await {
                tracing::warn!("remote upload abort failed for {}: {e}", handle.media_id);
            }
        }
    }

    /// Remote identity and progress snapshot. Partial before `Active`.
    pub fn meta(&self) -> ChannelMeta {
        Self::meta_from(&self.shared.state.lock())
    }

    pub fn status(&self) -> ChannelStatus {
        self.shared.state.lock().status
    }

    pub fn offset(&self) -> u64 {
        self.shared.state.lock().offset
    }

    pub fn media_id(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .handle
            .as_ref()
            .map(|h| h.media_id.clone())
    }

    fn meta_from(state: &ChannelState) -> ChannelMeta {
        ChannelMeta {
            media_id: state.handle.as_ref().map(|h| h.media_id.clone()),
            video_id: state.handle.as_ref().map(|h| h.video_id.clone()),
            status: state.status,
            offset: state.offset,
            error: state.error.clone(),
            width: state.descriptor.as_ref().map(|d| d.width).unwrap_or(0),
            height: state.descriptor.as_ref().map(|d| d.height).unwrap_or(0),
            scene_id: state.descriptor.as_ref().map(|d| d.scene_id.clone()),
        }
    }

    async fn writer_loop(shared: Arc<ChannelShared>, mut rx: mpsc::UnboundedReceiver<QueuedChunk>) {
        while let Some(job) = rx.recv().await {
            let (handle, offset, aborted) = {
                let state = shared.state.lock();
                (
                    state.handle.clone(),
                    state.offset,
                    state.status == ChannelStatus::Aborted,
                )
            };

            let result = if aborted {
                Err(UploadError::Aborted)
            } else if let Some(handle) = handle {
                Self::upload_with_retry(&shared, &handle, offset, &job.bytes).await
            } else {
                Err(UploadError::NotActive {
                    status: ChannelStatus::Uninitialized,
                })
            };

            match &result {
                Ok(new_offset) => {
                    let mut state = shared.state.lock();
                    debug_assert!(*new_offset >= state.offset);
                    state.offset = *new_offset;
                    state.error = None;
                }
                Err(e) => {
                    if !matches!(e, UploadError::Aborted) {
                        shared.state.lock().error = Some(e.to_string());
                    }
                }
            }

            // The writer may outlive the caller (e.g. pump task already
            // gone); a dropped receiver is fine.
            let _ = job.ack.send(result);

            let mut pending = shared.pending.lock();
            *pending -= 1;
            if *pending == 0 {
                shared.drained.notify_waiters();
            }
        }
    }

    async fn upload_with_retry(
        shared: &ChannelShared,
        handle: &UploadHandle,
        offset: u64,
        bytes: &[u8],
    ) -> Result<u64, UploadError> {
        let mut attempt = 0u32;
        loop {
            if shared.state.lock().status == ChannelStatus::Aborted {
                return Err(UploadError::Aborted);
            }
            match shared.target.append_chunk(handle, offset, bytes).await {
                Ok(new_offset) => return Ok(new_offset),
                Err(e) => {
                    if shared.retry.should_retry(attempt, &e) {
                        tracing::warn!(
                            "chunk upload at offset {offset} failed (attempt {}): {e}",
                            attempt + 1
                        );
                        shared.retry.wait_before_retry(attempt).await;
                        attempt += 1;
                    } else {
                        return Err(UploadError::RetriesExhausted {
                            attempts: attempt + 1,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }
}

impl Drop for UploadChannel {
    fn drop(&mut self) {
        // Dropping the sender lets the writer task drain and exit.
        self.queue.lock().take();
    }
}
