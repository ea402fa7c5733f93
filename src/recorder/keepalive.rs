//! Keep-alive monitor
//!
//! Long recordings can outlive the host's auth token; a background ticker
//! revalidates it and warns the host when it lapses. The monitor never
//! stops the recording itself.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::events::{EventBus, SessionEvent};

pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(60);

/// Answer from the external auth collaborator.
#[derive(Debug, Clone, Copy)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub subscribed: bool,
}

#[async_trait]
pub trait AuthProbe: Send + Sync {
    async fn probe(&self) -> anyhow::Result<AuthStatus>;
}

#[derive(Default)]
pub struct KeepAliveMonitor {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAliveMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, probe: Arc<dyn AuthProbe>, events: EventBus) {
        self.stop();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEP_ALIVE_PERIOD);
            // The first tick fires immediately; the session already
            // validated auth at start.
            interval.tick().await;
            loop {
                interval.tick().await;
                match probe.probe().await {
                    Ok(status) if status.authenticated => {
                        tracing::debug!("keep-alive ok, subscribed={}", status.subscribed);
                    }
                    Ok(_) => {
                        tracing::warn!("keep-alive: session no longer authenticated");
                        events.emit(SessionEvent::SessionCheckFailed(
                            "session no longer authenticated".into(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!("keep-alive probe failed: {e}");
                        events.emit(SessionEvent::SessionCheckFailed(e.to_string()));
                    }
                }
            }
        });

        *self.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for KeepAliveMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
