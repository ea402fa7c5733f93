//! Persisted session flags and failure diagnostics
//!
//! The physical key-value backend lives in the host; this module defines
//! the collaborator contract and the small set of records that must
//! survive a process restart. A momentarily unavailable store is retried
//! once and then surfaced, never silently swallowed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::scene::{TrackDurations, UploadMeta};

const SESSION_FLAGS_KEY: &str = "scenecast.sessionFlags";
const FAILED_RECORDING_KEY: &str = "scenecast.failedRecording";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Async key-value collaborator persisting state across process restarts.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, keys: &[&str]) -> anyhow::Result<HashMap<String, String>>;
    async fn set(&self, entries: &[(&str, String)]) -> anyhow::Result<()>;
    async fn remove(&self, keys: &[&str]) -> anyhow::Result<()>;
}

/// Live-session flags that must survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFlags {
    pub recording: bool,
    pub project_id: Option<String>,
    pub scene_id: Option<String>,
}

/// Diagnostic snapshot persisted when a finalize fails, for operator
/// inspection after the session is gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecording {
    pub upload_meta: UploadMeta,
    pub durations: TrackDurations,
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

/// Typed persistence over the raw key-value collaborator.
pub struct FlagStore {
    store: Arc<dyn KeyValueStore>,
}

impl FlagStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn save_flags(&self, flags: &SessionFlags) -> Result<(), StorageError> {
        let value = serde_json::to_string(flags)?;
        self.set_with_retry(SESSION_FLAGS_KEY, value).await
    }

    pub async fn load_flags(&self) -> Result<Option<SessionFlags>, StorageError> {
        self.get_json(SESSION_FLAGS_KEY).await
    }

    pub async fn clear_flags(&self) -> Result<(), StorageError> {
        self.store
            .remove(&[SESSION_FLAGS_KEY])
            .await
            .map_err(StorageError::Unavailable)
    }

    pub async fn record_failure(&self, diagnostic: &FailedRecording) -> Result<(), StorageError> {
        let value = serde_json::to_string(diagnostic)?;
        self.set_with_retry(FAILED_RECORDING_KEY, value).await
    }

    /// Load and clear the persisted failure diagnostic, if any.
    pub async fn take_failure(&self) -> Result<Option<FailedRecording>, StorageError> {
        let diagnostic: Option<FailedRecording> = self.get_json(FAILED_RECORDING_KEY).await?;
        if diagnostic.is_some() {
            self.store
                .remove(&[FAILED_RECORDING_KEY])
                .await
                .map_err(StorageError::Unavailable)?;
        }
        Ok(diagnostic)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let values = self
            .store
            .get(&[key])
            .await
            .map_err(StorageError::Unavailable)?;
        match values.get(key) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn set_with_retry(&self, key: &str, value: String) -> Result<(), StorageError> {
        match self.store.set(&[(key, value.clone())]).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!("store write for {key} failed, retrying once: {first}");
                self.store
                    .set(&[(key, value)])
                    .await
                    .map_err(StorageError::Unavailable)
            }
        }
    }
}

/// In-memory store for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> anyhow::Result<HashMap<String, String>> {
        let entries = self.entries.lock();
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, new_entries: &[(&str, String)]) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        for (key, value) in new_entries {
            entries.insert(key.to_string(), value.clone());
        }
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
