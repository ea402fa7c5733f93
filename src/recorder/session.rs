//! Recording session state machine
//!
//! Owns the recording lifecycle for one session instance: acquires
//! streams, wires encoder output into chunk spools and upload channels,
//! tracks per-source durations, and drives finalize/dismiss/restart.
//!
//! Finalize side effects run at most once per session, no matter how many
//! triggers fire concurrently (explicit stop, track-ended, duration
//! limit); a single-fire latch at the top of the finalize path enforces
//! it.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio;
use crate::capture::{
    CaptureSource, EncoderEvent, EncoderFactory, StreamHandle, TrackKind,
};
use crate::recorder::events::{EventBus, SessionEvent};
use crate::recorder::keepalive::{AuthProbe, KeepAliveMonitor};
use crate::recorder::state::{SessionConfig, SessionRequest, SessionState};
use crate::recorder::timer::Timer;
use crate::recorder::track::{ConsecutiveFailures, TrackSet, TrackState, MAX_CONSECUTIVE_FAILURES};
use crate::scene::{
    ClickEvent, SceneExtras, SceneReconciler, SceneResult, TrackDurations, UploadMeta,
};
use crate::storage::{FailedRecording, FlagStore, SessionFlags};
use crate::upload::{ChunkSink, UploadChannel, UploadDescriptor, UploadError, UploadTarget};
use crate::utils::error::RecorderError;

/// Encoders emit one chunk every two seconds.
pub const CHUNK_CADENCE: Duration = Duration::from_millis(2000);

/// Collaborators a session needs to run.
pub struct SessionDeps {
    pub capture: Arc<dyn CaptureSource>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub upload_target: Arc<dyn UploadTarget>,
    pub project_api: Arc<dyn crate::scene::ProjectApi>,
    pub store: Arc<dyn crate::storage::KeyValueStore>,
    pub auth: Arc<dyn AuthProbe>,
    /// Directory for local chunk spools.
    pub spool_dir: PathBuf,
}

/// What a `stop` call produced.
#[derive(Debug)]
pub enum StopOutcome {
    /// Finalize ran to completion and created a scene.
    Finalized(SceneResult),
    /// Encoders stopped without scene creation (`finalize = false`).
    Stopped(Box<UploadMeta>),
    /// Another trigger already owned finalize, or the session ignores
    /// stops in its current state.
    Ignored,
}

pub struct RecordingSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    deps: SessionDeps,
    flags: FlagStore,
    events: EventBus,
    reconciler: SceneReconciler,

    state: RwLock<SessionState>,
    config: RwLock<SessionConfig>,
    request: Mutex<Option<SessionRequest>>,

    project_id: Mutex<Option<String>>,
    scene_id: Mutex<Option<String>>,
    new_project: AtomicBool,

    tracks: Mutex<TrackSet>,
    finalize_guard: AtomicBool,
    /// True while the session itself is stopping encoders, so a pump
    /// seeing its encoder end does not mistake that for a died source.
    halting: AtomicBool,

    ticker: Mutex<Option<JoinHandle<()>>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    keepalive: KeepAliveMonitor,

    audio_levels: Mutex<Vec<f32>>,
    thumbnail: Mutex<Option<String>>,
    click_events: Mutex<Vec<ClickEvent>>,
}

impl RecordingSession {
    pub fn new(deps: SessionDeps) -> Self {
        let flags = FlagStore::new(deps.store.clone());
        let reconciler = SceneReconciler::new(deps.project_api.clone());
        Self {
            inner: Arc::new(SessionInner {
                deps,
                flags,
                events: EventBus::new(),
                reconciler,
                state: RwLock::new(SessionState::Idle),
                config: RwLock::new(SessionConfig::default()),
                request: Mutex::new(None),
                project_id: Mutex::new(None),
                scene_id: Mutex::new(None),
                new_project: AtomicBool::new(false),
                tracks: Mutex::new(TrackSet::default()),
                finalize_guard: AtomicBool::new(false),
                halting: AtomicBool::new(false),
                ticker: Mutex::new(None),
                pumps: Mutex::new(Vec::new()),
                keepalive: KeepAliveMonitor::new(),
                audio_levels: Mutex::new(Vec::new()),
                thumbnail: Mutex::new(None),
                click_events: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn project_id(&self) -> Option<String> {
        self.inner.project_id.lock().clone()
    }

    pub fn scene_id(&self) -> Option<String> {
        self.inner.scene_id.lock().clone()
    }

    /// Elapsed active recording time of the primary track.
    pub fn elapsed_ms(&self) -> u64 {
        SessionInner::primary_elapsed_ms(&self.inner)
    }

    pub fn push_click_event(&self, event: ClickEvent) {
        self.inner.click_events.lock().push(event);
    }

    pub fn set_thumbnail(&self, data_url: String) {
        *self.inner.thumbnail.lock() = Some(data_url);
    }

    /// Feed decoded microphone samples for silence analysis.
    pub fn append_audio_levels(&self, samples: &[f32]) {
        self.inner.audio_levels.lock().extend_from_slice(samples);
    }

    /// Acquire streams, allocate the project and upload targets, and move
    /// to `Streaming`. On any failure every acquired resource is released
    /// and the session rolls back to `Idle`.
    pub async fn load(&self, request: SessionRequest) -> Result<(), RecorderError> {
        SessionInner::load(&self.inner, request).await
    }

    /// Start encoders, timers, the duration ticker, and keep-alive.
    pub async fn start(&self) -> Result<(), RecorderError> {
        SessionInner::start(&self.inner).await
    }

    pub async fn pause(&self) -> Result<(), RecorderError> {
        SessionInner::pause(&self.inner).await
    }

    pub async fn resume(&self) -> Result<(), RecorderError> {
        SessionInner::resume(&self.inner).await
    }

    /// Stop recording. With `finalize = true` this drains uploads,
    /// creates the scene, and tears the session down exactly once.
    pub async fn stop(&self, finalize: bool) -> Result<StopOutcome, RecorderError> {
        SessionInner::stop(&self.inner, finalize).await
    }

    /// Discard the recording. With `restarting = true` the session ends
    /// in `Restarting` and a subsequent `load` starts over.
    pub async fn dismiss(&self, restarting: bool) -> Result<(), RecorderError> {
        SessionInner::dismiss(&self.inner, restarting).await
    }
}

impl SessionInner {
    fn transition(self: &Arc<Self>, to: SessionState) -> Result<(), RecorderError> {
        let mut state = self.state.write();
        if !state.allows(to) {
            return Err(RecorderError::InvalidState(format!(
                "cannot move from {:?} to {to:?}",
                *state
            )));
        }
        tracing::debug!("session state: {:?} -> {to:?}", *state);
        *state = to;
        Ok(())
    }

    async fn load(inner: &Arc<Self>, request: SessionRequest) -> Result<(), RecorderError> {
        inner.transition(SessionState::Initializing)?;

        match Self::initialize(inner, &request).await {
            Ok(()) => {
                *inner.request.lock() = Some(request);
                inner.transition(SessionState::Streaming)?;
                if let Some(project_id) = inner.project_id.lock().clone() {
                    inner.events.emit(SessionEvent::EditorReady { project_id });
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!("session initialization failed: {e}");
                Self::rollback_initialization(inner).await;
                let _ = inner.transition(SessionState::Idle);
                Err(e)
            }
        }
    }

    async fn initialize(inner: &Arc<Self>, request: &SessionRequest) -> Result<(), RecorderError> {
        if request.screen.is_none() && request.camera.is_none() {
            return Err(RecorderError::InvalidState(
                "session request names no media source".into(),
            ));
        }

        *inner.config.write() = SessionConfig::from_request(request);
        inner.finalize_guard.store(false, Ordering::SeqCst);
        inner.audio_levels.lock().clear();
        inner.click_events.lock().clear();

        let scene_id = request
            .scene_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Streams first: an acquisition failure must leave no remote state.
        if let Some(screen) = &request.screen {
            let stream = inner
                .deps
                .capture
                .acquire_screen(&screen.selector, screen.width, screen.height)
                .await?;
            Self::add_track(inner, TrackKind::Screen, stream, &scene_id)?;
        }
        if let Some(camera) = &request.camera {
            let stream = inner
                .deps
                .capture
                .acquire_camera(&camera.device_id, camera.width, camera.height)
                .await?;
            Self::add_track(inner, TrackKind::Camera, stream, &scene_id)?;
        }
        if let Some(audio_src) = &request.audio {
            let stream = inner.deps.capture.acquire_audio(&audio_src.device_id).await?;
            Self::add_track(inner, TrackKind::Audio, stream, &scene_id)?;
        }

        // The project is created lazily, on the first session that needs
        // one.
        let project_id = match &request.project_id {
            Some(id) => {
                inner.new_project.store(false, Ordering::SeqCst);
                id.clone()
            }
            None => {
                let info = inner
                    .deps
                    .project_api
                    .create_project(&request.title)
                    .await
                    .map_err(|e| RecorderError::Initialization(e.to_string()))?;
                inner.new_project.store(true, Ordering::SeqCst);
                info.project_id
            }
        };
        *inner.project_id.lock() = Some(project_id.clone());
        *inner.scene_id.lock() = Some(scene_id.clone());

        // Screen first so the camera target can link to its media id.
        let mut linked_media_id = None;
        if let Some(screen) = &request.screen {
            let channel =
                Self::open_channel(inner, &project_id, &scene_id, request, TrackKind::Screen,
                    screen.width, screen.height, None)
                .await?;
            linked_media_id = channel.media_id();
            inner.tracks.lock().screen.as_mut().expect("screen track exists").channel =
                Some(channel);
        }
        if let Some(camera) = &request.camera {
            let channel =
                Self::open_channel(inner, &project_id, &scene_id, request, TrackKind::Camera,
                    camera.width, camera.height, linked_media_id)
                .await?;
            inner.tracks.lock().camera.as_mut().expect("camera track exists").channel =
                Some(channel);
        }

        Self::persist_flags(inner, false).await;
        Ok(())
    }

    fn add_track(
        inner: &Arc<Self>,
        kind: TrackKind,
        stream: StreamHandle,
        scene_id: &str,
    ) -> Result<(), RecorderError> {
        let sink = match ChunkSink::create(&inner.deps.spool_dir, &format!("{scene_id}-{kind}")) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                // Recording proceeds without a local backup.
                tracing::warn!("could not open {kind} chunk spool: {e}");
                None
            }
        };
        let encoder = inner.deps.encoders.encoder_for(&stream);
        inner.tracks.lock().insert(TrackState {
            kind,
            stream,
            encoder,
            channel: None,
            sink,
            timer: Arc::new(Timer::new()),
            failures: Arc::new(ConsecutiveFailures::new()),
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_channel(
        inner: &Arc<Self>,
        project_id: &str,
        scene_id: &str,
        request: &SessionRequest,
        kind: TrackKind,
        width: u32,
        height: u32,
        linked_media_id: Option<String>,
    ) -> Result<Arc<UploadChannel>, RecorderError> {
        let channel = Arc::new(UploadChannel::new(inner.deps.upload_target.clone()));
        channel
            .initialize(
                project_id,
                UploadDescriptor {
                    title: request.title.clone(),
                    kind,
                    width,
                    height,
                    linked_media_id,
                    scene_id: scene_id.to_string(),
                },
            )
            .await?;
        Ok(channel)
    }

    /// Undo a partial initialization: abort any allocated upload targets,
    /// drop a just-created project, release streams.
    async fn rollback_initialization(inner: &Arc<Self>) {
        let channels: Vec<Arc<UploadChannel>> = {
            let tracks = inner.tracks.lock();
            tracks.iter().filter_map(|t| t.channel.clone()).collect()
        };
        for channel in channels {
            channel.abort().await;
        }

        if let Some(project_id) = inner.project_id.lock().clone() {
            if inner.new_project.load(Ordering::SeqCst) {
                let meta = Self::build_upload_meta(inner);
                if let Err(e) = inner
                    .reconciler
                    .reconcile_on_failure(&project_id, &meta, true)
                    .await
                {
                    tracing::warn!("could not remove abandoned project {project_id}: {e}");
                }
            }
        }

        Self::release_streams(inner).await;
        Self::discard_sinks(inner);
        inner.tracks.lock().clear();
        *inner.project_id.lock() = None;
        *inner.scene_id.lock() = None;
    }

    async fn start(inner: &Arc<Self>) -> Result<(), RecorderError> {
        inner.transition(SessionState::Recording)?;

        struct TrackStartup {
            kind: TrackKind,
            encoder: Arc<dyn crate::capture::ChunkEncoder>,
            stream: StreamHandle,
            channel: Option<Arc<UploadChannel>>,
            sink: Option<Arc<ChunkSink>>,
            failures: Arc<ConsecutiveFailures>,
            timer: Arc<Timer>,
        }

        let startups: Vec<TrackStartup> = {
            let tracks = inner.tracks.lock();
            tracks
                .iter()
                .map(|t| TrackStartup {
                    kind: t.kind,
                    encoder: t.encoder.clone(),
                    stream: t.stream.clone(),
                    channel: t.channel.clone(),
                    sink: t.sink.clone(),
                    failures: t.failures.clone(),
                    timer: t.timer.clone(),
                })
                .collect()
        };

        inner.halting.store(false, Ordering::SeqCst);
        for startup in startups {
            let rx = startup.encoder.start(&startup.stream, CHUNK_CADENCE).await?;
            startup.timer.start();
            let pump = Self::spawn_pump(
                inner.clone(),
                startup.kind,
                rx,
                startup.channel,
                startup.sink,
                startup.failures,
            );
            inner.pumps.lock().push(pump);
        }

        *inner.ticker.lock() = Some(Self::spawn_ticker(inner.clone()));
        inner
            .keepalive
            .start(inner.deps.auth.clone(), inner.events.clone());

        Self::persist_flags(inner, true).await;
        inner.events.emit(SessionEvent::Started);
        tracing::info!("recording started");
        Ok(())
    }

    fn spawn_pump(
        inner: Arc<Self>,
        kind: TrackKind,
        mut rx: mpsc::Receiver<EncoderEvent>,
        channel: Option<Arc<UploadChannel>>,
        sink: Option<Arc<ChunkSink>>,
        failures: Arc<ConsecutiveFailures>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    EncoderEvent::Chunk(bytes) => {
                        if let Some(sink) = &sink {
                            if let Err(e) = sink.append(&bytes) {
                                tracing::warn!("failed to spool {kind} chunk: {e}");
                            }
                        }
                        let Some(channel) = &channel else { continue };
                        match channel.write(bytes).await {
                            Ok(_) => failures.reset(),
                            Err(UploadError::Aborted) => break,
                            Err(UploadError::NotActive { status }) => {
                                tracing::debug!("{kind} chunk dropped, channel {status:?}");
                            }
                            Err(e) => {
                                let streak = failures.record_failure();
                                tracing::error!(
                                    "{kind} chunk upload failed ({streak} consecutive): {e}"
                                );
                                if streak > MAX_CONSECUTIVE_FAILURES {
                                    inner.events.emit(SessionEvent::RecordingError(format!(
                                        "{kind} uploads are failing repeatedly"
                                    )));
                                    let trigger = inner.clone();
                                    tokio::spawn(async move {
                                        if let Err(e) = SessionInner::stop(&trigger, true).await {
                                            tracing::error!("forced stop failed: {e}");
                                        }
                                    });
                                }
                            }
                        }
                    }
                    EncoderEvent::Stopped => break,
                }
            }

            // A screen source ending on its own (window closed, share
            // revoked) is a stop trigger like any other.
            if kind == TrackKind::Screen && !inner.halting.load(Ordering::SeqCst) {
                let state = *inner.state.read();
                if matches!(state, SessionState::Recording | SessionState::Paused) {
                    tracing::info!("screen track ended, finalizing session");
                    let trigger = inner.clone();
                    tokio::spawn(async move {
                        if let Err(e) = SessionInner::stop(&trigger, true).await {
                            tracing::error!("track-ended stop failed: {e}");
                        }
                    });
                }
            }
        })
    }

    fn spawn_ticker(inner: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            let mut warned = false;
            loop {
                interval.tick().await;
                let state = *inner.state.read();
                if !matches!(state, SessionState::Recording | SessionState::Paused) {
                    break;
                }
                let elapsed = Self::primary_elapsed_ms(&inner);
                let (max_ms, warning_ms) = {
                    let config = inner.config.read();
                    (config.max_duration_ms, config.warning_threshold_ms)
                };
                let remaining = max_ms.saturating_sub(elapsed);
                if remaining == 0 {
                    tracing::info!("recording duration limit reached, forcing finalize");
                    let trigger = inner.clone();
                    tokio::spawn(async move {
                        if let Err(e) = SessionInner::stop(&trigger, true).await {
                            tracing::error!("duration-limit stop failed: {e}");
                        }
                    });
                    break;
                }
                if remaining <= warning_ms && !warned {
                    warned = true;
                    inner
                        .events
                        .emit(SessionEvent::TimeWarning { remaining_ms: remaining });
                }
            }
        })
    }

    async fn pause(inner: &Arc<Self>) -> Result<(), RecorderError> {
        inner.transition(SessionState::Paused)?;

        let items: Vec<_> = {
            let tracks = inner.tracks.lock();
            tracks
                .iter()
                .map(|t| (t.encoder.clone(), t.channel.clone(), t.timer.clone()))
                .collect()
        };
        for (encoder, channel, timer) in items {
            encoder.pause().await?;
            if let Some(channel) = channel {
                channel.pause();
            }
            timer.pause();
        }
        inner.events.emit(SessionEvent::Paused);
        Ok(())
    }

    async fn resume(inner: &Arc<Self>) -> Result<(), RecorderError> {
        inner.transition(SessionState::Recording)?;

        let items: Vec<_> = {
            let tracks = inner.tracks.lock();
            tracks
                .iter()
                .map(|t| (t.encoder.clone(), t.channel.clone(), t.timer.clone()))
                .collect()
        };
        for (encoder, channel, timer) in items {
            encoder.resume().await?;
            if let Some(channel) = channel {
                channel.resume();
            }
            timer.resume();
        }
        inner.events.emit(SessionEvent::Resumed);
        Ok(())
    }

    async fn stop(inner: &Arc<Self>, finalize: bool) -> Result<StopOutcome, RecorderError> {
        {
            let state = *inner.state.read();
            match state {
                SessionState::Recording | SessionState::Paused => {}
                SessionState::Finalizing
                | SessionState::Dismissing
                | SessionState::Restarting
                | SessionState::Completed
                | SessionState::Failed => {
                    tracing::debug!("ignoring stop request in {state:?}");
                    return Ok(StopOutcome::Ignored);
                }
                other => {
                    return Err(RecorderError::InvalidState(format!(
                        "cannot stop while {other:?}"
                    )))
                }
            }
        }

        if !finalize {
            Self::halt_capture(inner).await;
            Self::join_pumps(inner).await;
            let meta = Self::build_upload_meta(inner);
            inner.transition(SessionState::Idle)?;
            return Ok(StopOutcome::Stopped(Box::new(meta)));
        }

        // Single-fire latch: whichever trigger gets here first owns the
        // finalize side effects; everyone else is a no-op.
        if inner.finalize_guard.swap(true, Ordering::SeqCst) {
            tracing::debug!("finalize already in flight, ignoring duplicate trigger");
            return Ok(StopOutcome::Ignored);
        }

        Self::finalize_session(inner).await.map(StopOutcome::Finalized)
    }

    async fn finalize_session(inner: &Arc<Self>) -> Result<SceneResult, RecorderError> {
        inner.transition(SessionState::Finalizing)?;
        Self::halt_capture(inner).await;

        // Both tracks must fully drain before metadata is assembled; a
        // partial drain silently truncates media.
        Self::join_pumps(inner).await;
        let channels: Vec<(Arc<UploadChannel>, Arc<ConsecutiveFailures>)> = {
            let tracks = inner.tracks.lock();
            tracks
                .iter()
                .filter_map(|t| t.channel.clone().map(|c| (c, t.failures.clone())))
                .collect()
        };
        for (channel, _) in &channels {
            channel.wait_for_pending_uploads().await;
        }

        // Commit surviving uploads; a track past its failure budget is
        // aborted instead, so truncated media never reaches a scene.
        for (channel, failures) in &channels {
            if failures.exceeded() {
                tracing::warn!("aborting upload after repeated failures");
                channel.abort().await;
            } else if let Err(e) = channel.finalize().await {
                tracing::error!("upload completion failed: {e}");
            }
        }

        let meta = Self::build_upload_meta(inner);
        let durations = Self::durations(inner);
        let extras = Self::scene_extras(inner);
        let project_id = inner
            .project_id
            .lock()
            .clone()
            .unwrap_or_default();

        let payload = match SceneReconciler::assemble(&meta, durations, &extras) {
            Ok(payload) => payload,
            Err(e) => {
                let message = e.to_string();
                Self::handle_finalize_failure(inner, &project_id, meta, durations, message).await;
                return Err(e.into());
            }
        };

        match inner.reconciler.submit(&project_id, &payload).await {
            Ok(result) => {
                if let Err(e) = inner
                    .flags
                    .save_flags(&SessionFlags {
                        recording: false,
                        project_id: Some(project_id),
                        scene_id: Some(result.scene_id.clone()),
                    })
                    .await
                {
                    tracing::warn!("could not persist completion flags: {e}");
                }
                Self::discard_sinks(inner);
                Self::release_streams(inner).await;
                inner.events.emit(SessionEvent::VideoReady {
                    scene_id: result.scene_id.clone(),
                });
                inner.transition(SessionState::Completed)?;
                tracing::info!("recording finalized into scene {}", result.scene_id);
                Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                Self::handle_finalize_failure(inner, &project_id, meta, durations, message).await;
                Err(e.into())
            }
        }
    }

    /// Failed finalize: persist a diagnostic snapshot, delete whatever
    /// remote media this session created, and surface the error. Never
    /// silent.
    async fn handle_finalize_failure(
        inner: &Arc<Self>,
        project_id: &str,
        meta: UploadMeta,
        durations: TrackDurations,
        error: String,
    ) {
        tracing::error!("finalize failed: {error}");

        let diagnostic = FailedRecording {
            upload_meta: meta.clone(),
            durations,
            timestamp: Utc::now(),
            error: error.clone(),
        };
        if let Err(e) = inner.flags.record_failure(&diagnostic).await {
            tracing::error!("could not persist failure diagnostic: {e}");
        }

        let recording_to_scene = inner.config.read().recording_to_scene;
        let delete_whole_project = meta.new_project && !recording_to_scene;
        if let Err(e) = inner
            .reconciler
            .reconcile_on_failure(project_id, &meta, delete_whole_project)
            .await
        {
            tracing::error!("failure reconciliation did not complete: {e}");
        }

        Self::persist_flags(inner, false).await;
        Self::release_streams(inner).await;
        inner.events.emit(SessionEvent::RecordingError(error));
        let _ = inner.transition(SessionState::Failed);
    }

    async fn dismiss(inner: &Arc<Self>, restarting: bool) -> Result<(), RecorderError> {
        {
            let state = *inner.state.read();
            if !state.is_active() {
                tracing::debug!("ignoring dismiss in {state:?}");
                return Ok(());
            }
        }
        inner.transition(if restarting {
            SessionState::Restarting
        } else {
            SessionState::Dismissing
        })?;

        Self::halt_capture(inner).await;

        // Abort both channels with wait-for-all semantics: one channel's
        // failure must not block the other's cleanup.
        let channels: Vec<Arc<UploadChannel>> = {
            let tracks = inner.tracks.lock();
            tracks.iter().filter_map(|t| t.channel.clone()).collect()
        };
        let mut aborts = Vec::new();
        for channel in channels {
            aborts.push(tokio::spawn(async move { channel.abort().await }));
        }
        for abort in aborts {
            let _ = abort.await;
        }
        Self::join_pumps(inner).await;

        let recording_to_scene = inner.config.read().recording_to_scene;
        if let Some(project_id) = inner.project_id.lock().clone() {
            // Scene-target flag wins: a recording destined for an existing
            // scene keeps that scene and, on restart, all of its media.
            let skip_deletion = restarting && recording_to_scene;
            if skip_deletion {
                tracing::debug!("restarting into a destination scene, keeping remote media");
            } else {
                let meta = Self::build_upload_meta(inner);
                let delete_whole_project =
                    !restarting && meta.new_project && !recording_to_scene;
                if let Err(e) = inner
                    .reconciler
                    .reconcile_on_failure(&project_id, &meta, delete_whole_project)
                    .await
                {
                    tracing::warn!("media cleanup after dismiss failed: {e}");
                }
            }
        }

        Self::discard_sinks(inner);
        Self::release_streams(inner).await;
        inner.tracks.lock().clear();
        if let Err(e) = inner.flags.clear_flags().await {
            tracing::warn!("could not clear session flags: {e}");
        }
        inner.events.emit(SessionEvent::Dismissed { restarting });

        if !restarting {
            inner.transition(SessionState::Idle)?;
        }
        tracing::info!("recording dismissed (restarting={restarting})");
        Ok(())
    }

    /// Stop the ticker, keep-alive, and encoders; freeze timers. Errors
    /// are logged, never propagated: teardown always proceeds.
    async fn halt_capture(inner: &Arc<Self>) {
        inner.halting.store(true, Ordering::SeqCst);
        if let Some(ticker) = inner.ticker.lock().take() {
            ticker.abort();
        }
        inner.keepalive.stop();

        let items: Vec<_> = {
            let tracks = inner.tracks.lock();
            tracks
                .iter()
                .map(|t| (t.kind, t.encoder.clone(), t.timer.clone()))
                .collect()
        };
        for (kind, encoder, timer) in items {
            if let Err(e) = encoder.stop().await {
                tracing::warn!("{kind} encoder stop failed: {e}");
            }
            timer.pause();
        }
    }

    /// Wait for the chunk pumps to process everything their encoders
    /// emitted, including final flush chunks.
    async fn join_pumps(inner: &Arc<Self>) {
        let pumps: Vec<JoinHandle<()>> = std::mem::take(&mut *inner.pumps.lock());
        for pump in pumps {
            let _ = pump.await;
        }
    }

    async fn release_streams(inner: &Arc<Self>) {
        let streams: Vec<StreamHandle> = {
            let tracks = inner.tracks.lock();
            tracks.iter().map(|t| t.stream.clone()).collect()
        };
        for stream in streams {
            inner.deps.capture.release(&stream).await;
        }
    }

    fn discard_sinks(inner: &Arc<Self>) {
        let tracks = inner.tracks.lock();
        for track in tracks.iter() {
            if let Some(sink) = &track.sink {
                if let Err(e) = sink.discard() {
                    tracing::debug!("{} spool discard failed: {e}", track.kind);
                }
            }
        }
    }

    fn build_upload_meta(inner: &Arc<Self>) -> UploadMeta {
        let tracks = inner.tracks.lock();
        UploadMeta {
            scene_id: inner.scene_id.lock().clone(),
            screen: tracks
                .screen
                .as_ref()
                .and_then(|t| t.channel.as_ref())
                .map(|c| c.meta()),
            camera: tracks
                .camera
                .as_ref()
                .and_then(|t| t.channel.as_ref())
                .map(|c| c.meta()),
            // Microphone audio is muxed into the caption track by the
            // encoder; it has no upload target of its own.
            audio_media_id: None,
            new_project: inner.new_project.load(Ordering::SeqCst),
        }
    }

    fn durations(inner: &Arc<Self>) -> TrackDurations {
        let tracks = inner.tracks.lock();
        TrackDurations {
            screen: tracks
                .screen
                .as_ref()
                .map(|t| t.timer.elapsed_ms())
                .unwrap_or(0),
            camera: tracks
                .camera
                .as_ref()
                .map(|t| t.timer.elapsed_ms())
                .unwrap_or(0),
        }
    }

    fn scene_extras(inner: &Arc<Self>) -> SceneExtras {
        let request = inner.request.lock();
        let config = inner.config.read();
        let has_audio_track = inner.tracks.lock().audio.is_some();
        let transcript_eligible = {
            let levels = inner.audio_levels.lock();
            has_audio_track && !audio::is_silent(&levels)
        };
        SceneExtras {
            thumbnail: inner.thumbnail.lock().clone(),
            click_events: inner.click_events.lock().clone(),
            surface: request.as_ref().and_then(|r| r.surface.clone()),
            domain: request.as_ref().and_then(|r| r.domain.clone()),
            is_tab: request.as_ref().map(|r| r.is_tab).unwrap_or(false),
            instant_mode: config.instant_mode,
            insert_after_scene_id: request
                .as_ref()
                .and_then(|r| r.insert_after_scene_id.clone()),
            transcript_eligible,
            camera_flip: request
                .as_ref()
                .and_then(|r| r.camera.as_ref())
                .map(|c| c.flip)
                .unwrap_or(false),
        }
    }

    fn primary_elapsed_ms(inner: &Arc<Self>) -> u64 {
        let tracks = inner.tracks.lock();
        tracks
            .screen
            .as_ref()
            .or(tracks.camera.as_ref())
            .or(tracks.audio.as_ref())
            .map(|t| t.timer.elapsed_ms())
            .unwrap_or(0)
    }

    async fn persist_flags(inner: &Arc<Self>, recording: bool) {
        let flags = SessionFlags {
            recording,
            project_id: inner.project_id.lock().clone(),
            scene_id: inner.scene_id.lock().clone(),
        };
        if let Err(e) = inner.flags.save_flags(&flags).await {
            tracing::error!("could not persist session flags: {e}");
            inner.events.emit(SessionEvent::RecordingError(format!(
                "session state could not be persisted: {e}"
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureError, CaptureResult, ChunkEncoder, SourceSelector};
    use crate::recorder::state::{AudioSource, CameraSource, ScreenSource};
    use crate::scene::{
        ApiError, CaptionSource, MediaDeletion, ProjectApi, ProjectInfo, ScenePayload,
    };
    use crate::storage::MemoryStore;
    use crate::upload::{TargetError, UploadHandle};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicU32;
    use tokio::time::{advance, timeout};

    #[derive(Default)]
    struct MockCapture {
        released: Mutex<Vec<String>>,
        deny_camera: bool,
    }

    #[async_trait]
    impl CaptureSource for MockCapture {
        async fn acquire_screen(
            &self,
            _selector: &SourceSelector,
            width: u32,
            height: u32,
        ) -> CaptureResult<StreamHandle> {
            Ok(StreamHandle {
                id: "stream-screen".into(),
                kind: TrackKind::Screen,
                width,
                height,
            })
        }

        async fn acquire_camera(
            &self,
            device_id: &str,
            width: u32,
            height: u32,
        ) -> CaptureResult<StreamHandle> {
            if self.deny_camera {
                return Err(CaptureError::PermissionDenied(device_id.to_string()));
            }
            Ok(StreamHandle {
                id: "stream-camera".into(),
                kind: TrackKind::Camera,
                width,
                height,
            })
        }

        async fn acquire_audio(&self, _device_id: &str) -> CaptureResult<StreamHandle> {
            Ok(StreamHandle {
                id: "stream-audio".into(),
                kind: TrackKind::Audio,
                width: 0,
                height: 0,
            })
        }

        async fn release(&self, stream: &StreamHandle) {
            self.released.lock().push(stream.id.clone());
        }
    }

    struct MockEncoder {
        tx: Mutex<Option<mpsc::Sender<EncoderEvent>>>,
    }

    impl MockEncoder {
        fn new() -> Self {
            Self { tx: Mutex::new(None) }
        }

        async fn emit(&self, bytes: Vec<u8>) {
            let tx = self.tx.lock().as_ref().cloned();
            tx.expect("encoder not started")
                .send(EncoderEvent::Chunk(bytes))
                .await
                .expect("pump gone");
        }
    }

    #[async_trait]
    impl ChunkEncoder for MockEncoder {
        async fn start(
            &self,
            _stream: &StreamHandle,
            _cadence: Duration,
        ) -> CaptureResult<mpsc::Receiver<EncoderEvent>> {
            let (tx, rx) = mpsc::channel(64);
            *self.tx.lock() = Some(tx);
            Ok(rx)
        }

        async fn pause(&self) -> CaptureResult<()> {
            Ok(())
        }

        async fn resume(&self) -> CaptureResult<()> {
            Ok(())
        }

        async fn stop(&self) -> CaptureResult<()> {
            let tx = self.tx.lock().take();
            if let Some(tx) = tx {
                let _ = tx.send(EncoderEvent::Stopped).await;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockEncoderFactory {
        encoders: Mutex<HashMap<TrackKind, Arc<MockEncoder>>>,
    }

    impl MockEncoderFactory {
        fn encoder(&self, kind: TrackKind) -> Arc<MockEncoder> {
            self.encoders
                .lock()
                .get(&kind)
                .cloned()
                .expect("encoder not built for track")
        }
    }

    impl EncoderFactory for MockEncoderFactory {
        fn encoder_for(&self, stream: &StreamHandle) -> Arc<dyn ChunkEncoder> {
            let encoder = Arc::new(MockEncoder::new());
            self.encoders.lock().insert(stream.kind, encoder.clone());
            encoder
        }
    }

    #[derive(Default)]
    struct MockTarget {
        accepted: Mutex<HashMap<String, Vec<Vec<u8>>>>,
        descriptors: Mutex<Vec<UploadDescriptor>>,
        fail_media: Mutex<HashSet<String>>,
        completed: Mutex<Vec<String>>,
        aborted: Mutex<Vec<String>>,
    }

    impl MockTarget {
        fn media_id(kind: TrackKind) -> String {
            format!("media-{kind}")
        }

        /// All appends and completes for this track fail with a network
        /// error.
        fn fail_kind(&self, kind: TrackKind) {
            self.fail_media.lock().insert(Self::media_id(kind));
        }

        fn chunks(&self, kind: TrackKind) -> Vec<Vec<u8>> {
            self.accepted
                .lock()
                .get(&Self::media_id(kind))
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl UploadTarget for MockTarget {
        async fn create(
            &self,
            _project_id: &str,
            descriptor: &UploadDescriptor,
        ) -> Result<UploadHandle, TargetError> {
            self.descriptors.lock().push(descriptor.clone());
            let media_id = Self::media_id(descriptor.kind);
            Ok(UploadHandle {
                media_id: media_id.clone(),
                video_id: format!("video-{}", descriptor.kind),
                upload_url: format!("mock://{media_id}"),
            })
        }

        async fn append_chunk(
            &self,
            handle: &UploadHandle,
            offset: u64,
            chunk: &[u8],
        ) -> Result<u64, TargetError> {
            if self.fail_media.lock().contains(&handle.media_id) {
                return Err(TargetError::Network("injected outage".into()));
            }
            let mut accepted = self.accepted.lock();
            let chunks = accepted.entry(handle.media_id.clone()).or_default();
            let expected: u64 = chunks.iter().map(|c| c.len() as u64).sum();
            assert_eq!(offset, expected, "chunk arrived at wrong offset");
            chunks.push(chunk.to_vec());
            Ok(expected + chunk.len() as u64)
        }

        async fn complete(&self, handle: &UploadHandle) -> Result<(), TargetError> {
            if self.fail_media.lock().contains(&handle.media_id) {
                return Err(TargetError::Network("injected outage".into()));
            }
            self.completed.lock().push(handle.media_id.clone());
            Ok(())
        }

        async fn abort(&self, handle: &UploadHandle) -> Result<(), TargetError> {
            self.aborted.lock().push(handle.media_id.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockApi {
        projects: AtomicU32,
        scenes: Mutex<Vec<ScenePayload>>,
        deletions: Mutex<Vec<(String, MediaDeletion)>>,
    }

    impl MockApi {
        fn scenes(&self) -> Vec<ScenePayload> {
            self.scenes.lock().clone()
        }

        fn deletions(&self) -> Vec<(String, MediaDeletion)> {
            self.deletions.lock().clone()
        }
    }

    #[async_trait]
    impl ProjectApi for MockApi {
        async fn create_project(&self, _title: &str) -> Result<ProjectInfo, ApiError> {
            let n = self.projects.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ProjectInfo {
                project_id: format!("project-{n}"),
            })
        }

        async fn create_scene(
            &self,
            _project_id: &str,
            payload: &ScenePayload,
        ) -> Result<SceneResult, ApiError> {
            self.scenes.lock().push(payload.clone());
            Ok(SceneResult {
                scene_id: payload.scene_id.clone(),
            })
        }

        async fn delete_media(
            &self,
            project_id: &str,
            deletion: &MediaDeletion,
        ) -> Result<(), ApiError> {
            self.deletions
                .lock()
                .push((project_id.to_string(), deletion.clone()));
            Ok(())
        }
    }

    struct AlwaysAuthed;

    #[async_trait]
    impl AuthProbe for AlwaysAuthed {
        async fn probe(&self) -> anyhow::Result<crate::recorder::keepalive::AuthStatus> {
            Ok(crate::recorder::keepalive::AuthStatus {
                authenticated: true,
                subscribed: true,
            })
        }
    }

    struct Harness {
        session: Arc<RecordingSession>,
        target: Arc<MockTarget>,
        api: Arc<MockApi>,
        capture: Arc<MockCapture>,
        factory: Arc<MockEncoderFactory>,
        store: Arc<MemoryStore>,
        _spool: tempfile::TempDir,
    }

    fn harness() -> Harness {
        harness_opts(false)
    }

    fn harness_opts(deny_camera: bool) -> Harness {
        let target = Arc::new(MockTarget::default());
        let api = Arc::new(MockApi::default());
        let capture = Arc::new(MockCapture {
            deny_camera,
            ..Default::default()
        });
        let factory = Arc::new(MockEncoderFactory::default());
        let store = Arc::new(MemoryStore::default());
        let spool = tempfile::tempdir().unwrap();
        let session = Arc::new(RecordingSession::new(SessionDeps {
            capture: capture.clone(),
            encoders: factory.clone(),
            upload_target: target.clone(),
            project_api: api.clone(),
            store: store.clone(),
            auth: Arc::new(AlwaysAuthed),
            spool_dir: spool.path().to_path_buf(),
        }));
        Harness {
            session,
            target,
            api,
            capture,
            factory,
            store,
            _spool: spool,
        }
    }

    fn request(screen: bool, camera: bool, audio_track: bool) -> SessionRequest {
        SessionRequest {
            title: "Test recording".into(),
            screen: screen.then(|| ScreenSource {
                selector: SourceSelector::Display { display_id: 1 },
                width: 1920,
                height: 1080,
            }),
            camera: camera.then(|| CameraSource {
                device_id: "cam-1".into(),
                width: 1280,
                height: 720,
                flip: false,
            }),
            audio: audio_track.then(|| AudioSource {
                device_id: "mic-1".into(),
            }),
            project_id: None,
            scene_id: None,
            insert_after_scene_id: None,
            instant_mode: false,
            multi_mode: false,
            surface: Some("monitor".into()),
            domain: None,
            is_tab: false,
            max_duration_ms: None,
        }
    }

    async fn wait_for_state(session: &RecordingSession, want: SessionState) {
        timeout(Duration::from_secs(30), async {
            while session.state() != want {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want:?}, at {:?}", session.state()));
    }

    async fn wait_for_event(
        rx: &mut broadcast::Receiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        timeout(Duration::from_secs(30), async {
            loop {
                let event = rx.recv().await.expect("event bus closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle_creates_scene() {
        let h = harness();
        let mut events = h.session.subscribe();

        h.session.load(request(true, true, true)).await.unwrap();
        assert_eq!(h.session.state(), SessionState::Streaming);
        assert_eq!(h.api.projects.load(Ordering::SeqCst), 1);

        // Camera target links to the screen media.
        let descriptors = h.target.descriptors.lock().clone();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].kind, TrackKind::Screen);
        assert_eq!(
            descriptors[1].linked_media_id.as_deref(),
            Some("media-screen")
        );

        h.session.start().await.unwrap();
        assert_eq!(h.session.state(), SessionState::Recording);

        let screen = h.factory.encoder(TrackKind::Screen);
        let camera = h.factory.encoder(TrackKind::Camera);
        screen.emit(vec![1; 10]).await;
        screen.emit(vec![2; 10]).await;
        camera.emit(vec![3; 6]).await;
        h.session.append_audio_levels(&[0.2; 1024]);

        let outcome = h.session.stop(true).await.unwrap();
        let result = match outcome {
            StopOutcome::Finalized(result) => result,
            other => panic!("expected Finalized, got {other:?}"),
        };
        assert_eq!(h.session.state(), SessionState::Completed);

        assert_eq!(
            h.target.chunks(TrackKind::Screen),
            vec![vec![1; 10], vec![2; 10]]
        );
        assert_eq!(h.target.chunks(TrackKind::Camera), vec![vec![3; 6]]);

        let scenes = h.api.scenes();
        assert_eq!(scenes.len(), 1);
        let payload = &scenes[0];
        assert_eq!(payload.scene_id, result.scene_id);
        assert_eq!(payload.screen_media_id.as_deref(), Some("media-screen"));
        assert_eq!(payload.camera_media_id.as_deref(), Some("media-camera"));
        assert_eq!(payload.caption_source, Some(CaptionSource::Camera));
        assert_eq!(
            payload.transcription_source_media_id.as_deref(),
            Some("media-camera")
        );
        assert_eq!(payload.surface.as_deref(), Some("monitor"));
        assert!(payload.new_project);

        wait_for_event(&mut events, |e| matches!(e, SessionEvent::VideoReady { .. })).await;

        let flags = FlagStore::new(h.store.clone())
            .load_flags()
            .await
            .unwrap()
            .unwrap();
        assert!(!flags.recording);
        assert_eq!(flags.scene_id, Some(result.scene_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_stop_triggers_finalize_once() {
        let h = harness();
        h.session.load(request(true, false, false)).await.unwrap();
        h.session.start().await.unwrap();
        h.factory.encoder(TrackKind::Screen).emit(vec![1; 8]).await;

        let mut triggers = Vec::new();
        for _ in 0..3 {
            let session = h.session.clone();
            triggers.push(tokio::spawn(async move { session.stop(true).await }));
        }

        let mut finalized = 0;
        let mut ignored = 0;
        for trigger in triggers {
            match trigger.await.unwrap().unwrap() {
                StopOutcome::Finalized(_) => finalized += 1,
                StopOutcome::Ignored => ignored += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(finalized, 1);
        assert_eq!(ignored, 2);

        // Exactly one scene, exactly one remote completion.
        assert_eq!(h.api.scenes().len(), 1);
        assert_eq!(h.target.completed.lock().len(), 1);
        assert_eq!(h.session.state(), SessionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_failure_forces_stop_with_surviving_screen() {
        let h = harness();
        h.target.fail_kind(TrackKind::Camera);

        h.session.load(request(true, true, false)).await.unwrap();
        h.session.start().await.unwrap();

        let screen = h.factory.encoder(TrackKind::Screen);
        let camera = h.factory.encoder(TrackKind::Camera);
        screen.emit(vec![1; 1024]).await;
        screen.emit(vec![2; 1024]).await;
        // Each chunk burns the full retry budget; the fourth failure
        // crosses the threshold and force-stops the session.
        for i in 0..4u8 {
            camera.emit(vec![i; 64]).await;
        }

        wait_for_state(&h.session, SessionState::Completed).await;

        let scenes = h.api.scenes();
        assert_eq!(scenes.len(), 1);
        let payload = &scenes[0];
        assert_eq!(payload.screen_media_id.as_deref(), Some("media-screen"));
        assert_eq!(payload.camera_media_id, None);
        assert_eq!(payload.caption_source, Some(CaptionSource::Screen));

        // The failing camera upload was cancelled, not committed.
        assert!(h.target.aborted.lock().contains(&"media-camera".to_string()));
        assert!(!h.target.completed.lock().contains(&"media-camera".to_string()));
        assert_eq!(h.target.chunks(TrackKind::Screen).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_dismiss_preserves_scene_destined_media() {
        let h = harness();
        let mut req = request(true, false, false);
        req.project_id = Some("project-7".into());
        req.scene_id = Some("scene-dest".into());

        h.session.load(req.clone()).await.unwrap();
        h.session.start().await.unwrap();
        let screen = h.factory.encoder(TrackKind::Screen);
        screen.emit(vec![1; 512]).await;
        screen.emit(vec![2; 512]).await;

        // Dismiss with chunks potentially still in flight; abort does not
        // wait for a drain.
        h.session.dismiss(true).await.unwrap();
        assert_eq!(h.session.state(), SessionState::Restarting);

        // Scene-destined recording: nothing is deleted remotely.
        assert!(h.api.deletions().is_empty());
        assert!(h.target.aborted.lock().contains(&"media-screen".to_string()));

        // The session can be loaded again for the retake.
        h.session.load(req).await.unwrap();
        assert_eq!(h.session.state(), SessionState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_deletes_abandoned_new_project() {
        let h = harness();
        let mut events = h.session.subscribe();
        h.session.load(request(true, false, false)).await.unwrap();
        h.session.start().await.unwrap();
        h.factory.encoder(TrackKind::Screen).emit(vec![1; 256]).await;

        h.session.dismiss(false).await.unwrap();
        assert_eq!(h.session.state(), SessionState::Idle);

        let deletions = h.api.deletions();
        assert_eq!(deletions.len(), 1);
        let (project_id, deletion) = &deletions[0];
        assert_eq!(project_id, "project-1");
        assert!(deletion.delete_whole_project);
        assert!(deletion.media_ids.contains(&"media-screen".to_string()));

        wait_for_event(&mut events, |e| {
            matches!(e, SessionEvent::Dismissed { restarting: false })
        })
        .await;
        assert_eq!(
            FlagStore::new(h.store.clone()).load_flags().await.unwrap(),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_upload_failure_persists_diagnostic() {
        let h = harness();
        let mut events = h.session.subscribe();
        h.target.fail_kind(TrackKind::Screen);

        h.session.load(request(true, false, false)).await.unwrap();
        h.session.start().await.unwrap();

        let screen = h.factory.encoder(TrackKind::Screen);
        for i in 0..4u8 {
            screen.emit(vec![i; 32]).await;
        }

        wait_for_state(&h.session, SessionState::Failed).await;
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::RecordingError(_))).await;

        assert!(h.api.scenes().is_empty());

        // Diagnostic snapshot persisted for operator inspection.
        let diagnostic = FlagStore::new(h.store.clone())
            .take_failure()
            .await
            .unwrap()
            .expect("diagnostic recorded");
        assert!(diagnostic.error.contains("cannot create a scene"));
        assert!(diagnostic.upload_meta.screen.is_some());

        // The abandoned new project and its media were reconciled away.
        let deletions = h.api.deletions();
        assert_eq!(deletions.len(), 1);
        assert!(deletions[0].1.delete_whole_project);
        assert!(deletions[0].1.media_ids.contains(&"media-screen".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_duration_excludes_paused_time() {
        let h = harness();
        let mut events = h.session.subscribe();
        h.session.load(request(true, false, false)).await.unwrap();
        h.session.start().await.unwrap();

        advance(Duration::from_millis(300)).await;
        h.session.pause().await.unwrap();
        assert_eq!(h.session.state(), SessionState::Paused);
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::Paused)).await;

        // A long pause must not count toward the recording.
        advance(Duration::from_secs(60)).await;
        assert_eq!(h.session.elapsed_ms(), 300);

        h.session.resume().await.unwrap();
        advance(Duration::from_millis(200)).await;
        assert_eq!(h.session.elapsed_ms(), 500);

        let outcome = h.session.stop(false).await.unwrap();
        match outcome {
            StopOutcome::Stopped(meta) => assert!(meta.screen.is_some()),
            other => panic!("expected Stopped, got {other:?}"),
        }
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.api.scenes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_limit_warns_then_forces_finalize() {
        let h = harness();
        let mut events = h.session.subscribe();
        let mut req = request(true, false, false);
        req.max_duration_ms = Some(5_000);

        h.session.load(req).await.unwrap();
        h.session.start().await.unwrap();
        h.factory.encoder(TrackKind::Screen).emit(vec![1; 128]).await;

        let warning =
            wait_for_event(&mut events, |e| matches!(e, SessionEvent::TimeWarning { .. })).await;
        match warning {
            SessionEvent::TimeWarning { remaining_ms } => assert!(remaining_ms <= 5_000),
            _ => unreachable!(),
        }

        wait_for_event(&mut events, |e| matches!(e, SessionEvent::VideoReady { .. })).await;
        wait_for_state(&h.session, SessionState::Completed).await;
        assert_eq!(h.api.scenes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_failure_rolls_back_to_idle() {
        let h = harness_opts(true);
        let err = h.session.load(request(true, true, false)).await.unwrap_err();
        assert!(matches!(err, RecorderError::Acquisition(_)));
        assert_eq!(h.session.state(), SessionState::Idle);

        // The screen stream acquired before the camera denial is released.
        assert_eq!(h.capture.released.lock().clone(), vec!["stream-screen"]);
        // Nothing remote was created.
        assert_eq!(h.api.projects.load(Ordering::SeqCst), 0);
        assert!(h.target.descriptors.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_rejected_before_recording() {
        let h = harness();
        h.session.load(request(true, false, false)).await.unwrap();
        let err = h.session.stop(true).await.unwrap_err();
        assert!(matches!(err, RecorderError::InvalidState(_)));
        // The latch was not consumed; a real stop still works.
        h.session.start().await.unwrap();
        h.factory.encoder(TrackKind::Screen).emit(vec![1; 8]).await;
        let outcome = h.session.stop(true).await.unwrap();
        assert!(matches!(outcome, StopOutcome::Finalized(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_ended_triggers_finalize() {
        let h = harness();
        h.session.load(request(true, false, false)).await.unwrap();
        h.session.start().await.unwrap();

        let screen = h.factory.encoder(TrackKind::Screen);
        screen.emit(vec![1; 64]).await;
        // The source dies on its own (window closed, share revoked).
        screen.stop().await.unwrap();

        wait_for_state(&h.session, SessionState::Completed).await;
        assert_eq!(h.api.scenes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_audio_skips_transcript() {
        let h = harness();
        h.session.load(request(true, false, true)).await.unwrap();
        h.session.start().await.unwrap();
        h.factory.encoder(TrackKind::Screen).emit(vec![1; 64]).await;
        h.session.append_audio_levels(&[0.001; 4096]);

        h.session.stop(true).await.unwrap();
        let scenes = h.api.scenes();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].transcription_source_media_id, None);
    }
}
