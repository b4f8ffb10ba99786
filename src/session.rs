//! Try-On Session Controller.
//!
//! Owns the session state machine and every resource of a run:
//!
//! ```text
//! Idle/Stopped --start--> Requesting --camera granted--> Active
//!                              |                           |
//!                              +--camera refused--> Denied +--model/engine error--> Failed
//! any state --stop--> Stopped
//! ```
//!
//! `Denied` also covers a granted camera whose output could not be set up
//! (no drawable surface, capture thread refused); the scene is disposed and
//! the stream released either way.
//!
//! Only the controller writes the state. Background completions (camera
//! acquisition, asset load, detections) carry the run's `LivenessToken` and
//! are applied under the session lock only while that token is live.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::asset::{
    fetcher_for, AssetFetcher, AssetJob, AssetLoader, Catalog, LoadState, ModelAsset,
};
use crate::config::TryOnConfig;
use crate::error::{ErrorKind, TryOnError, TryOnResult};
use crate::frame::VideoFrame;
use crate::landmark::{
    engine_for, DetectionEvent, DetectorAdapter, DetectorConfig, DetectorStats, LandmarkEngine,
    LatestSlot, SlotRecv,
};
use crate::liveness::{Liveness, LivenessToken};
use crate::media::{self, CameraBackend, CameraStream, MediaSourceManager};
use crate::pose::{PlacementTransform, PoseMapper};
use crate::render::{RenderLoop, RenderTarget, Scene, SharedCell};

const PUMP_POLL: Duration = Duration::from_millis(100);
/// Upper bound between predicate checks; pipeline counters change without a notify.
const WAIT_POLL: Duration = Duration::from_millis(20);

/// Builds the landmark engine for each run.
pub type EngineFactory = Arc<dyn Fn() -> TryOnResult<Box<dyn LandmarkEngine>> + Send + Sync>;

/// Provides the render surface for each run.
pub type SurfaceFactory = Arc<dyn Fn() -> Box<dyn RenderTarget> + Send + Sync>;

/// External collaborators of a session.
pub struct SessionDeps {
    pub camera: Arc<dyn CameraBackend>,
    pub engines: EngineFactory,
    pub catalog: Arc<dyn Catalog>,
    pub fetcher: Arc<dyn AssetFetcher>,
    pub surface: SurfaceFactory,
}

impl SessionDeps {
    /// Camera backend, engine and fetcher as named by the configuration.
    pub fn from_config(
        config: &TryOnConfig,
        catalog: Arc<dyn Catalog>,
        surface: SurfaceFactory,
    ) -> TryOnResult<Self> {
        let camera =
            media::backend_for(&config.camera_constraints(), &config.camera.synthetic)?;
        let tracking = config.tracking.clone();
        Ok(Self {
            camera,
            engines: Arc::new(move || engine_for(&tracking)),
            catalog,
            fetcher: fetcher_for(&config.assets),
            surface,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    #[default]
    Idle,
    Requesting,
    Active,
    Stopped,
    Denied,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_captured: u64,
    pub frames_submitted: u64,
    /// Frames replaced at the detector input before inference.
    pub frames_dropped: u64,
    pub detections: u64,
    pub misses: u64,
    pub transforms_applied: u64,
    pub render_ticks: u64,
}

/// Point-in-time view of a session.
#[derive(Clone, Debug)]
pub struct TryOnSession {
    pub session_id: String,
    pub state: SessionState,
    pub product_id: String,
    pub current_transform: Option<PlacementTransform>,
    pub last_error: Option<ErrorKind>,
    pub last_error_message: Option<String>,
    pub asset_state: LoadState,
    pub tracking_enabled: bool,
    pub model_attached: bool,
    pub render_running: bool,
    pub active_streams: usize,
    pub stats: SessionStats,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub error: Option<ErrorKind>,
    pub at: Instant,
}

pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    config: TryOnConfig,
    deps: SessionDeps,
    session_id: String,
    product_id: String,
    media: MediaSourceManager,
    mapper: PoseMapper,
    liveness: Liveness,
    placement: SharedCell<PlacementTransform>,
    video: SharedCell<VideoFrame>,
    transforms_applied: AtomicU64,
    core: Mutex<Core>,
    changed: Condvar,
}

#[derive(Default)]
struct Core {
    state: SessionState,
    history: Vec<StateTransition>,
    last_error: Option<TryOnError>,
    asset_state: LoadState,
    pending_asset_failure: Option<TryOnError>,
    scene: Option<Arc<Mutex<Scene>>>,
    stream: Option<CameraStream>,
    detector: Option<DetectorAdapter>,
    pump: Option<JoinHandle<()>>,
    render: Option<RenderLoop>,
    acquisition: Option<JoinHandle<()>>,
    loader: Option<AssetJob>,
    retired_detector: DetectorStats,
    retired_ticks: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn new_session_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}

impl SessionController {
    pub fn new(config: TryOnConfig, deps: SessionDeps, product_id: impl Into<String>) -> Self {
        let media = MediaSourceManager::new(deps.camera.clone());
        let mapper = PoseMapper::new(config.mapper_config());
        let inner = Inner {
            session_id: new_session_id(),
            product_id: product_id.into(),
            media,
            mapper,
            liveness: Liveness::new(),
            placement: SharedCell::new(),
            video: SharedCell::new(),
            transforms_applied: AtomicU64::new(0),
            core: Mutex::new(Core::default()),
            changed: Condvar::new(),
            config,
            deps,
        };
        log::info!(
            "TryOnSession: {} created for product {} (camera backend {})",
            inner.session_id,
            inner.product_id,
            inner.media.backend_name()
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Begin a run: probe, request the camera and load the model in parallel.
    ///
    /// Allowed from `Idle` and `Stopped`. Returns once the request is in
    /// flight; observe the outcome through `status` or `wait_for_state`.
    pub fn start(&self) -> TryOnResult<()> {
        let inner = &self.inner;
        let leftovers = {
            let mut core = inner.lock_core();
            inner.ensure_startable(&core)?;
            (core.acquisition.take(), core.loader.take())
        };
        join_background(leftovers);

        let constraints = inner.config.camera_constraints();
        if let Err(err) = inner.media.probe(&constraints) {
            let mut core = inner.lock_core();
            log::warn!("TryOnSession: {} capability probe failed: {}", inner.session_id, err);
            inner.fail(&mut core, err.clone());
            return Err(err);
        }

        let mut core = inner.lock_core();
        inner.ensure_startable(&core)?;
        let token = inner.liveness.begin();
        core.last_error = None;
        core.pending_asset_failure = None;
        inner.placement.clear();
        inner.video.clear();
        core.scene = Some(Arc::new(Mutex::new(Scene::new(&inner.config.scene_config()))));
        inner.transition(&mut core, SessionState::Requesting, None);

        self.spawn_asset_load(&mut core, &token);

        let acquirer = self.inner.clone();
        let acquire_token = token.clone();
        let spawned = std::thread::Builder::new()
            .name("tryon-acquire".to_string())
            .spawn(move || {
                let result = acquirer.media.open(constraints);
                acquirer.on_camera_result(&acquire_token, result);
            });
        match spawned {
            Ok(handle) => {
                core.acquisition = Some(handle);
                Ok(())
            }
            Err(e) => {
                let err = TryOnError::new(
                    ErrorKind::CameraUnavailable,
                    format!("failed to spawn camera acquisition: {}", e),
                );
                inner.deny(&mut core, err.clone());
                Err(err)
            }
        }
    }

    fn spawn_asset_load(&self, core: &mut Core, token: &LivenessToken) {
        let inner = &self.inner;
        let record = match inner.deps.catalog.product(&inner.product_id) {
            Ok(record) => record,
            Err(err) => {
                let err = TryOnError::classify(&err, ErrorKind::ModelLoadFailed);
                log::warn!("TryOnSession: {} catalog lookup failed: {}", inner.session_id, err);
                core.asset_state = LoadState::Failed;
                core.pending_asset_failure = Some(err);
                return;
            }
        };

        log::info!(
            "TryOnSession: {} loading {} ({})",
            inner.session_id,
            record.display_name,
            record.model_asset_ref
        );
        let loader = AssetLoader::new(inner.deps.fetcher.clone(), inner.config.assets.max_bytes);
        let completion = self.inner.clone();
        let completion_token = token.clone();
        let job = loader.load(
            ModelAsset::new(record.product_id, record.model_asset_ref),
            token.clone(),
            move |asset| completion.on_asset_loaded(&completion_token, asset),
        );
        match job {
            Ok(job) => {
                core.asset_state = LoadState::Loading;
                core.loader = Some(job);
            }
            Err(err) => {
                core.asset_state = LoadState::Failed;
                core.pending_asset_failure = Some(err);
            }
        }
    }

    /// Tear down the run from any state. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn status(&self) -> TryOnSession {
        let core = self.inner.lock_core();
        self.inner.snapshot(&core)
    }

    /// States visited so far, starting with `Idle`.
    pub fn transitions(&self) -> Vec<SessionState> {
        let core = self.inner.lock_core();
        std::iter::once(SessionState::Idle)
            .chain(core.history.iter().map(|t| t.to))
            .collect()
    }

    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.lock_core().history.clone()
    }

    /// Block until `predicate` holds for a snapshot, or `timeout` passes.
    pub fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Option<TryOnSession>
    where
        F: Fn(&TryOnSession) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut core = self.inner.lock_core();
        loop {
            let snapshot = self.inner.snapshot(&core);
            if predicate(&snapshot) {
                return Some(snapshot);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            core = self
                .inner
                .changed
                .wait_timeout(core, (deadline - now).min(WAIT_POLL))
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        self.wait_for(timeout, |s| s.state == state).is_some()
    }

    /// Scale the overlay by `factor` (zoom in > 1, zoom out < 1).
    pub fn adjust_zoom(&self, factor: f32) -> TryOnResult<()> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(TryOnError::new(
                ErrorKind::InvalidTransition,
                format!("zoom factor must be positive, got {}", factor),
            ));
        }
        let core = self.inner.lock_core();
        let render = core.render.as_ref().ok_or_else(no_overlay)?;
        render.adjust_zoom(factor);
        Ok(())
    }

    /// Undo the accumulated overlay spin.
    pub fn reset_rotation(&self) -> TryOnResult<()> {
        let core = self.inner.lock_core();
        let render = core.render.as_ref().ok_or_else(no_overlay)?;
        render.reset_rotation();
        Ok(())
    }

    /// Wait for outstanding camera acquisition and asset load threads.
    pub fn join_background(&self) {
        let handles = {
            let mut core = self.inner.lock_core();
            (core.acquisition.take(), core.loader.take())
        };
        join_background(handles);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

fn no_overlay() -> TryOnError {
    TryOnError::new(ErrorKind::InvalidTransition, "no overlay is rendering")
}

fn join_background((acquisition, loader): (Option<JoinHandle<()>>, Option<AssetJob>)) {
    if let Some(handle) = acquisition {
        if handle.join().is_err() {
            log::error!("TryOnSession: acquisition thread panicked");
        }
    }
    if let Some(job) = loader {
        job.join();
    }
}

impl Inner {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        lock(&self.core)
    }

    fn ensure_startable(&self, core: &Core) -> TryOnResult<()> {
        match core.state {
            SessionState::Idle | SessionState::Stopped => Ok(()),
            other => Err(TryOnError::new(
                ErrorKind::InvalidTransition,
                format!("cannot start a session that is {:?}", other),
            )),
        }
    }

    fn transition(&self, core: &mut Core, to: SessionState, error: Option<ErrorKind>) {
        let from = core.state;
        core.state = to;
        core.history.push(StateTransition {
            from,
            to,
            error,
            at: Instant::now(),
        });
        match error {
            Some(kind) => log::warn!(
                "TryOnSession: {} {:?} -> {:?} ({})",
                self.session_id,
                from,
                to,
                kind
            ),
            None => log::info!("TryOnSession: {} {:?} -> {:?}", self.session_id, from, to),
        }
        self.changed.notify_all();
    }

    /// Enter `Failed`. The first error of a run is the one reported.
    fn fail(&self, core: &mut Core, err: TryOnError) {
        if core.state == SessionState::Failed {
            log::warn!(
                "TryOnSession: {} already failed; ignoring {}",
                self.session_id,
                err
            );
            return;
        }
        let kind = err.kind;
        core.last_error = Some(err);
        self.transition(core, SessionState::Failed, Some(kind));
    }

    /// Model failure while active: drop the overlay, keep the video.
    fn fail_model(&self, core: &mut Core, err: TryOnError) {
        if let Some(scene) = &core.scene {
            if lock(scene).remove_model() {
                log::info!("TryOnSession: {} model node removed", self.session_id);
            }
        }
        self.fail(core, err);
    }

    fn deny(&self, core: &mut Core, err: TryOnError) {
        self.liveness.revoke();
        if let Some(scene) = core.scene.take() {
            lock(&scene).dispose();
        }
        let kind = err.kind;
        core.last_error = Some(err);
        self.transition(core, SessionState::Denied, Some(kind));
    }

    fn on_camera_result(self: &Arc<Self>, token: &LivenessToken, result: TryOnResult<CameraStream>) {
        // Engine load and warm-up can take seconds; keep them off the session lock.
        let result = result.map(|stream| (stream, self.prepare_detector(token)));

        let mut core = self.lock_core();
        let live = token.is_live() && core.state == SessionState::Requesting;
        match result {
            Ok((mut stream, detector)) if !live => {
                drop(core);
                log::info!(
                    "TryOnSession: {} camera granted after stop; releasing",
                    self.session_id
                );
                if let Ok(mut adapter) = detector {
                    adapter.shutdown();
                }
                self.media.close(&mut stream);
            }
            Ok((stream, detector)) => self.activate(&mut core, stream, detector, token),
            Err(err) if live => self.deny(&mut core, err),
            Err(err) => log::info!(
                "TryOnSession: {} ignoring camera result for a stale run: {}",
                self.session_id,
                err
            ),
        }
    }

    fn prepare_detector(&self, token: &LivenessToken) -> TryOnResult<DetectorAdapter> {
        if !token.is_live() {
            return Err(TryOnError::new(
                ErrorKind::InvalidTransition,
                "session stopped before tracking started",
            ));
        }
        (self.deps.engines)()
            .and_then(|engine| DetectorAdapter::initialize(engine, DetectorConfig::default()))
    }

    fn activate(
        self: &Arc<Self>,
        core: &mut Core,
        mut stream: CameraStream,
        detector: TryOnResult<DetectorAdapter>,
        token: &LivenessToken,
    ) {
        let Some(scene) = core.scene.clone() else {
            self.media.close(&mut stream);
            return;
        };

        let (detector, engine_failure) = match detector {
            Ok(adapter) => (Some(adapter), None),
            Err(err) => (None, Some(err)),
        };

        let mut render = RenderLoop::new(
            self.config.scene_config(),
            scene,
            self.placement.clone(),
            self.video.clone(),
        );
        if let Err(err) = render.start((self.deps.surface)()) {
            self.media.close(&mut stream);
            self.deny(core, err);
            return;
        }

        let submitter = detector.as_ref().map(DetectorAdapter::submitter);
        let video = self.video.clone();
        let sink = Box::new(move |frame: VideoFrame| {
            video.set(frame.clone());
            if let Some(submitter) = &submitter {
                submitter.submit(frame);
            }
        });
        if let Err(err) = self.media.start_capture(&stream, sink) {
            render.stop();
            self.media.close(&mut stream);
            self.deny(core, err);
            return;
        }

        if let Some(adapter) = &detector {
            let pump = self.spawn_pump(adapter.events(), token.clone());
            core.pump = pump;
        }
        core.detector = detector;
        core.stream = Some(stream);
        core.render = Some(render);
        self.transition(core, SessionState::Active, None);

        if let Some(err) = engine_failure {
            log::warn!(
                "TryOnSession: {} tracking disabled: {}",
                self.session_id,
                err
            );
            self.fail(core, err);
        }
        if let Some(err) = core.pending_asset_failure.take() {
            self.fail_model(core, err);
        }
    }

    fn spawn_pump(
        self: &Arc<Self>,
        events: Arc<LatestSlot<DetectionEvent>>,
        token: LivenessToken,
    ) -> Option<JoinHandle<()>> {
        let inner = self.clone();
        let spawned = std::thread::Builder::new()
            .name("tryon-tracking".to_string())
            .spawn(move || loop {
                match events.recv_timeout(PUMP_POLL) {
                    SlotRecv::Value(event) => inner.on_detection(&token, event),
                    SlotRecv::Timeout if token.is_live() => continue,
                    SlotRecv::Timeout | SlotRecv::Closed => break,
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!(
                    "TryOnSession: {} failed to spawn tracking pump: {}",
                    self.session_id,
                    e
                );
                None
            }
        }
    }

    fn on_detection(&self, token: &LivenessToken, event: DetectionEvent) {
        let DetectionEvent::Landmarks(frame) = event else {
            return;
        };
        let core = self.lock_core();
        if !token.is_live() || core.state != SessionState::Active {
            return;
        }
        let mut current = self.placement.get();
        if self.mapper.update(&mut current, &frame) {
            if let Some(transform) = current {
                self.placement.set(transform);
            }
            self.transforms_applied.fetch_add(1, Ordering::Relaxed);
            self.changed.notify_all();
        }
    }

    fn on_asset_loaded(&self, token: &LivenessToken, asset: ModelAsset) {
        let mut core = self.lock_core();
        if !token.is_live() {
            return;
        }
        core.asset_state = asset.load_state();
        if asset.load_state() == LoadState::Ready {
            if let Some(scene) = &core.scene {
                match lock(scene).install_model(&asset) {
                    Ok(()) => log::info!(
                        "TryOnSession: {} model {} attached",
                        self.session_id,
                        asset.id
                    ),
                    Err(err) => log::warn!(
                        "TryOnSession: {} could not attach model: {}",
                        self.session_id,
                        err
                    ),
                }
            }
        } else {
            let err = asset.error().cloned().unwrap_or_else(|| {
                TryOnError::new(
                    ErrorKind::ModelLoadFailed,
                    format!("model {} did not load", asset.id),
                )
            });
            match core.state {
                SessionState::Active | SessionState::Failed => self.fail_model(&mut core, err),
                SessionState::Requesting => core.pending_asset_failure = Some(err),
                _ => {}
            }
        }
        self.changed.notify_all();
    }

    fn stop(&self) {
        let (render, detector, pump, stream, scene) = {
            let mut core = self.lock_core();
            self.liveness.revoke();
            self.placement.clear();
            if core.state != SessionState::Stopped {
                self.transition(&mut core, SessionState::Stopped, None);
            }
            core.pending_asset_failure = None;
            (
                core.render.take(),
                core.detector.take(),
                core.pump.take(),
                core.stream.take(),
                core.scene.take(),
            )
        };

        let mut retired_ticks = 0;
        if let Some(mut render) = render {
            render.stop();
            retired_ticks = render.stats().ticks;
        }
        let mut retired_detector = None;
        if let Some(mut detector) = detector {
            detector.shutdown();
            retired_detector = Some(detector.stats());
        }
        if let Some(pump) = pump {
            if pump.join().is_err() {
                log::error!("TryOnSession: tracking pump panicked");
            }
        }
        if let Some(mut stream) = stream {
            self.media.close(&mut stream);
        }
        if let Some(scene) = scene {
            lock(&scene).dispose();
        }
        self.video.clear();

        let mut core = self.lock_core();
        core.retired_ticks += retired_ticks;
        if let Some(stats) = retired_detector {
            let total = &mut core.retired_detector;
            total.submitted += stats.submitted;
            total.dropped += stats.dropped;
            total.processed += stats.processed;
            total.detections += stats.detections;
            total.misses += stats.misses;
            total.engine_errors += stats.engine_errors;
            total.stale += stats.stale;
        }
        self.changed.notify_all();
    }

    fn snapshot(&self, core: &Core) -> TryOnSession {
        let live_detector = core.detector.as_ref().map(DetectorAdapter::stats).unwrap_or_default();
        let live_ticks = core.render.as_ref().map(|r| r.stats().ticks).unwrap_or(0);
        let retired = &core.retired_detector;
        let model_attached = core
            .scene
            .as_ref()
            .is_some_and(|scene| lock(scene).has_model());

        TryOnSession {
            session_id: self.session_id.clone(),
            state: core.state,
            product_id: self.product_id.clone(),
            current_transform: self.placement.get(),
            last_error: core.last_error.as_ref().map(|e| e.kind),
            last_error_message: core.last_error.as_ref().map(|e| e.message.clone()),
            asset_state: core.asset_state,
            tracking_enabled: core.detector.is_some(),
            model_attached,
            render_running: core.render.as_ref().is_some_and(RenderLoop::is_running),
            active_streams: self.media.active_stream_count(),
            stats: SessionStats {
                frames_captured: self.media.stats().frames_captured,
                frames_submitted: retired.submitted + live_detector.submitted,
                frames_dropped: retired.dropped + live_detector.dropped,
                detections: retired.detections + live_detector.detections,
                misses: retired.misses + live_detector.misses,
                transforms_applied: self.transforms_applied.load(Ordering::Relaxed),
                render_ticks: core.retired_ticks + live_ticks,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{FileFetcher, ProductRecord, StaticCatalog};
    use crate::landmark::{ScriptStep, ScriptedEngine};
    use crate::media::{PermissionPolicy, SyntheticCamera, SyntheticCameraConfig};
    use crate::render::RecordingTarget;

    fn deps(camera: SyntheticCameraConfig) -> SessionDeps {
        SessionDeps {
            camera: Arc::new(SyntheticCamera::new(camera)),
            engines: Arc::new(|| {
                Ok(Box::new(ScriptedEngine::from_steps(vec![ScriptStep::hand(0.5, 0.5, 0.9)]))
                    as Box<dyn LandmarkEngine>)
            }),
            catalog: Arc::new(StaticCatalog::new().with_product(ProductRecord {
                product_id: "w-1".to_string(),
                model_asset_ref: "/nonexistent/w1.glb".to_string(),
                display_name: "Field Watch".to_string(),
                brand: None,
            })),
            fetcher: Arc::new(FileFetcher::default()),
            surface: Arc::new(|| Box::new(RecordingTarget::new(64, 48)) as Box<dyn RenderTarget>),
        }
    }

    #[test]
    fn new_session_is_idle_with_hex_id() {
        let session = SessionController::new(
            TryOnConfig::default(),
            deps(SyntheticCameraConfig::default()),
            "w-1",
        );
        let status = session.status();
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.session_id.len(), 16);
        assert!(status.session_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(session.transitions(), vec![SessionState::Idle]);
    }

    #[test]
    fn start_twice_is_invalid() {
        let session = SessionController::new(
            TryOnConfig::default(),
            deps(SyntheticCameraConfig {
                prompt_delay: Duration::from_millis(200),
                ..SyntheticCameraConfig::default()
            }),
            "w-1",
        );
        session.start().unwrap();
        let err = session.start().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTransition);
        session.stop();
        session.join_background();
    }

    #[test]
    fn unsupported_device_fails_without_requesting() {
        let session = SessionController::new(
            TryOnConfig::default(),
            deps(SyntheticCameraConfig {
                supported: false,
                ..SyntheticCameraConfig::default()
            }),
            "w-1",
        );
        let err = session.start().unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedDevice);
        let status = session.status();
        assert_eq!(status.state, SessionState::Failed);
        assert_eq!(status.last_error, Some(ErrorKind::UnsupportedDevice));
        assert_eq!(
            session.transitions(),
            vec![SessionState::Idle, SessionState::Failed]
        );
    }

    #[test]
    fn view_controls_need_an_overlay() {
        let session = SessionController::new(
            TryOnConfig::default(),
            deps(SyntheticCameraConfig {
                permission: PermissionPolicy::Deny,
                ..SyntheticCameraConfig::default()
            }),
            "w-1",
        );
        assert_eq!(
            session.adjust_zoom(1.2).unwrap_err().kind,
            ErrorKind::InvalidTransition
        );
        assert!(session.reset_rotation().is_err());
        assert!(session.adjust_zoom(-1.0).is_err());
    }
}
