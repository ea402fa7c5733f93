//! Scenecast - resumable screen & camera recording pipeline.
//!
//! Captures screen/camera/microphone media through collaborator traits,
//! splits it into a continuous stream of chunks, uploads those chunks to
//! a remote store over a resumable session-based protocol, and finalizes
//! each recording into a persisted scene record.
//!
//! The core guarantees exactly-once finalization and cleanup under
//! concurrent stop triggers, flaky networks, and mid-flight dismissals.

pub mod audio;
pub mod capture;
pub mod recorder;
pub mod scene;
pub mod storage;
pub mod upload;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for hosts that don't install their own
/// subscriber.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scenecast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
