//! Media Source Manager.
//!
//! Owns the camera device for a session and its start/stop lifecycle:
//! - `open` is the single place a permission prompt may occur, and refuses to
//!   run twice concurrently or while a stream is already active
//! - `start_capture` spawns the capture thread that feeds frames to a sink
//! - `close` stops the capture thread and releases all device tracks; it is
//!   idempotent, and dropping an open `CameraStream` closes it too
//!
//! Backends:
//! - `stub://` synthetic devices with a scripted permission outcome (testing, demo)
//! - V4L2 device nodes (feature: camera-v4l2)

mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use anyhow::Result;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{ErrorKind, TryOnError, TryOnResult};
use crate::frame::VideoFrame;

pub use synthetic::{PermissionPolicy, SyntheticCamera, SyntheticCameraConfig};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Which way the requested camera faces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    Environment,
    User,
}

/// Constraints passed to the platform capture API.
#[derive(Clone, Debug)]
pub struct CameraConstraints {
    /// Device locator (e.g. "/dev/video0", "stub://front_camera").
    pub device: String,
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            device: "stub://front_camera".to_string(),
            facing: FacingMode::Environment,
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Platform media-capture API.
pub trait CameraBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capability check run before a session starts.
    fn probe(&self, constraints: &CameraConstraints) -> TryOnResult<()>;

    /// Acquire a live device. May block on a user permission prompt.
    fn acquire(&self, constraints: &CameraConstraints) -> TryOnResult<Box<dyn CameraDevice>>;
}

/// A live camera device.
pub trait CameraDevice: Send {
    /// Block until the next frame is due at device cadence.
    fn next_frame(&mut self) -> Result<VideoFrame>;

    /// Release every underlying track. Called exactly once by the manager.
    fn stop_tracks(&mut self);
}

/// Called on the capture thread for every delivered frame.
pub type FrameSink = Box<dyn FnMut(VideoFrame) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl StreamHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Handle to an open camera stream. The device itself stays with the manager.
#[derive(Debug)]
pub struct CameraStream {
    pub handle: StreamHandle,
    pub constraints: CameraConstraints,
    active: bool,
    manager: Weak<Shared>,
}

impl CameraStream {
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(shared) = self.manager.upgrade() {
            log::warn!(
                "MediaSourceManager: stream {} dropped while open, closing",
                self.handle.0
            );
            shared.release(self.handle);
        }
    }
}

/// Capture statistics across the manager's lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub capture_errors: u64,
    pub streams_opened: u64,
    pub streams_closed: u64,
}

#[derive(Clone)]
pub struct MediaSourceManager {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn CameraBackend>,
    state: Mutex<ManagerState>,
    next_handle: AtomicU64,
    frames_captured: Arc<AtomicU64>,
    capture_errors: Arc<AtomicU64>,
    streams_opened: AtomicU64,
    streams_closed: AtomicU64,
}

#[derive(Default)]
struct ManagerState {
    opening: bool,
    active: Option<ActiveStream>,
}

struct ActiveStream {
    handle: StreamHandle,
    device: Option<Box<dyn CameraDevice>>,
    capture: Option<CaptureThread>,
}

struct CaptureThread {
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<Box<dyn CameraDevice>>,
}

impl MediaSourceManager {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                state: Mutex::new(ManagerState::default()),
                next_handle: AtomicU64::new(1),
                frames_captured: Arc::new(AtomicU64::new(0)),
                capture_errors: Arc::new(AtomicU64::new(0)),
                streams_opened: AtomicU64::new(0),
                streams_closed: AtomicU64::new(0),
            }),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.shared.backend.name()
    }

    /// Capability check; failures are reported as `UnsupportedDevice`.
    pub fn probe(&self, constraints: &CameraConstraints) -> TryOnResult<()> {
        self.shared.backend.probe(constraints).map_err(|err| {
            if err.kind == ErrorKind::UnsupportedDevice {
                err
            } else {
                TryOnError::new(ErrorKind::UnsupportedDevice, err.message)
            }
        })
    }

    /// Acquire the camera. Fails with `CameraPermissionDenied` or `CameraUnavailable`.
    pub fn open(&self, constraints: CameraConstraints) -> TryOnResult<CameraStream> {
        {
            let mut state = self.shared.lock_state();
            if state.opening {
                return Err(TryOnError::new(
                    ErrorKind::CameraUnavailable,
                    "camera acquisition already in progress",
                ));
            }
            if state.active.is_some() {
                return Err(TryOnError::new(
                    ErrorKind::CameraUnavailable,
                    "a camera stream is already active",
                ));
            }
            state.opening = true;
        }

        log::info!(
            "MediaSourceManager: requesting {} via {} ({}x{} @ {} fps, facing {:?})",
            constraints.device,
            self.shared.backend.name(),
            constraints.width,
            constraints.height,
            constraints.target_fps,
            constraints.facing
        );
        let acquired = self.shared.backend.acquire(&constraints);

        let mut state = self.shared.lock_state();
        state.opening = false;
        let device = acquired.map_err(|err| {
            log::warn!("MediaSourceManager: acquisition failed: {}", err);
            err
        })?;

        let handle = StreamHandle(self.shared.next_handle.fetch_add(1, Ordering::SeqCst));
        state.active = Some(ActiveStream {
            handle,
            device: Some(device),
            capture: None,
        });
        self.shared.streams_opened.fetch_add(1, Ordering::SeqCst);
        log::info!("MediaSourceManager: stream {} open", handle.0);

        Ok(CameraStream {
            handle,
            constraints,
            active: true,
            manager: Arc::downgrade(&self.shared),
        })
    }

    /// Start the capture thread for an open stream.
    pub fn start_capture(&self, stream: &CameraStream, mut sink: FrameSink) -> TryOnResult<()> {
        if !stream.active {
            return Err(TryOnError::new(
                ErrorKind::CameraUnavailable,
                "cannot capture from a closed stream",
            ));
        }
        let mut state = self.shared.lock_state();
        let active = state
            .active
            .as_mut()
            .filter(|active| active.handle == stream.handle)
            .ok_or_else(|| {
                TryOnError::new(ErrorKind::CameraUnavailable, "stream is not owned by this manager")
            })?;
        let mut device = active.device.take().ok_or_else(|| {
            TryOnError::new(ErrorKind::CameraUnavailable, "capture already running")
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let frames = self.shared.frames_captured.clone();
        let errors = self.shared.capture_errors.clone();
        let handle = stream.handle;
        let join = std::thread::Builder::new()
            .name(format!("tryon-capture-{}", handle.0))
            .spawn(move || {
                while !shutdown_thread.load(Ordering::SeqCst) {
                    match device.next_frame() {
                        Ok(frame) => {
                            frames.fetch_add(1, Ordering::Relaxed);
                            sink(frame);
                        }
                        Err(err) => {
                            errors.fetch_add(1, Ordering::Relaxed);
                            log::warn!("MediaSourceManager: capture error on {}: {:#}", handle.0, err);
                            std::thread::sleep(Duration::from_millis(50));
                        }
                    }
                }
                device
            })
            .map_err(|e| {
                TryOnError::new(
                    ErrorKind::CameraUnavailable,
                    format!("failed to spawn capture thread: {}", e),
                )
            })?;

        active.capture = Some(CaptureThread { shutdown, join });
        Ok(())
    }

    /// Release every device track behind `stream`. Safe to call repeatedly.
    pub fn close(&self, stream: &mut CameraStream) {
        if !stream.active {
            return;
        }
        stream.active = false;
        self.shared.release(stream.handle);
    }

    /// Number of open streams (0 or 1).
    pub fn active_stream_count(&self) -> usize {
        usize::from(self.shared.lock_state().active.is_some())
    }

    pub fn is_acquiring(&self) -> bool {
        self.shared.lock_state().opening
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            capture_errors: self.shared.capture_errors.load(Ordering::Relaxed),
            streams_opened: self.shared.streams_opened.load(Ordering::SeqCst),
            streams_closed: self.shared.streams_closed.load(Ordering::SeqCst),
        }
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        // The state is plain bookkeeping; a panicked capture thread never holds it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, handle: StreamHandle) {
        let taken = {
            let mut state = self.lock_state();
            match state.active.as_ref() {
                Some(active) if active.handle == handle => state.active.take(),
                _ => None,
            }
        };
        let Some(mut active) = taken else {
            return;
        };

        let mut device = active.device.take();
        if let Some(capture) = active.capture.take() {
            capture.shutdown.store(true, Ordering::SeqCst);
            match capture.join.join() {
                Ok(returned) => device = Some(returned),
                Err(_) => log::error!("MediaSourceManager: capture thread {} panicked", handle.0),
            }
        }
        if let Some(mut device) = device {
            device.stop_tracks();
        }
        self.streams_closed.fetch_add(1, Ordering::SeqCst);
        log::info!("MediaSourceManager: stream {} closed", handle.0);
    }
}

/// Pick a backend for a device locator. `stub://` devices follow `synthetic`.
pub fn backend_for(
    constraints: &CameraConstraints,
    synthetic: &SyntheticCameraConfig,
) -> TryOnResult<Arc<dyn CameraBackend>> {
    if constraints.device.starts_with("stub://") {
        return Ok(Arc::new(SyntheticCamera::new(synthetic.clone())));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        Ok(Arc::new(V4l2Camera::new()))
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        Err(TryOnError::new(
            ErrorKind::UnsupportedDevice,
            format!(
                "device {} requires the camera-v4l2 feature",
                constraints.device
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    fn manager_with(config: SyntheticCameraConfig) -> (MediaSourceManager, SyntheticCamera) {
        let camera = SyntheticCamera::new(config);
        (MediaSourceManager::new(Arc::new(camera.clone())), camera)
    }

    #[test]
    fn open_then_close_releases_tracks() {
        let (manager, camera) = manager_with(SyntheticCameraConfig::default());
        let mut stream = manager.open(CameraConstraints::default()).unwrap();
        assert!(stream.is_active());
        assert_eq!(manager.active_stream_count(), 1);
        assert_eq!(camera.live_devices(), 1);

        manager.close(&mut stream);
        assert!(!stream.is_active());
        assert_eq!(manager.active_stream_count(), 0);
        assert_eq!(camera.live_devices(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let (manager, camera) = manager_with(SyntheticCameraConfig::default());
        let mut stream = manager.open(CameraConstraints::default()).unwrap();
        manager.close(&mut stream);
        manager.close(&mut stream);
        assert_eq!(manager.stats().streams_closed, 1);
        assert_eq!(camera.released_devices(), 1);
    }

    #[test]
    fn second_open_while_active_is_refused() {
        let (manager, _camera) = manager_with(SyntheticCameraConfig::default());
        let mut first = manager.open(CameraConstraints::default()).unwrap();
        let err = manager.open(CameraConstraints::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CameraUnavailable);
        manager.close(&mut first);
        assert!(manager.open(CameraConstraints::default()).is_ok());
    }

    #[test]
    fn concurrent_open_is_refused_while_prompt_pending() {
        let (manager, _camera) = manager_with(SyntheticCameraConfig {
            prompt_delay: Duration::from_millis(200),
            ..SyntheticCameraConfig::default()
        });
        let background = manager.clone();
        let pending = std::thread::spawn(move || background.open(CameraConstraints::default()));

        let deadline = Instant::now() + Duration::from_secs(2);
        while !manager.is_acquiring() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let err = manager.open(CameraConstraints::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CameraUnavailable);

        let mut stream = pending.join().unwrap().unwrap();
        manager.close(&mut stream);
    }

    #[test]
    fn denied_permission_leaves_nothing_open() {
        let (manager, camera) = manager_with(SyntheticCameraConfig {
            permission: PermissionPolicy::Deny,
            ..SyntheticCameraConfig::default()
        });
        let err = manager.open(CameraConstraints::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CameraPermissionDenied);
        assert_eq!(manager.active_stream_count(), 0);
        assert_eq!(camera.live_devices(), 0);
    }

    #[test]
    fn dropping_open_stream_closes_it() {
        let (manager, camera) = manager_with(SyntheticCameraConfig::default());
        let stream = manager.open(CameraConstraints::default()).unwrap();
        drop(stream);
        assert_eq!(manager.active_stream_count(), 0);
        assert_eq!(camera.live_devices(), 0);
    }

    #[test]
    fn capture_delivers_frames_until_closed() {
        let (manager, camera) = manager_with(SyntheticCameraConfig::default());
        let constraints = CameraConstraints {
            width: 32,
            height: 24,
            target_fps: 200,
            ..CameraConstraints::default()
        };
        let mut stream = manager.open(constraints).unwrap();
        let (tx, rx) = mpsc::channel();
        manager
            .start_capture(
                &stream,
                Box::new(move |frame| {
                    let _ = tx.send(frame);
                }),
            )
            .unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.width, 32);
        assert!(second.sequence > first.sequence);
        assert!(second.captured_at > first.captured_at);

        manager.close(&mut stream);
        assert_eq!(camera.live_devices(), 0);
        assert!(manager.stats().frames_captured >= 2);
    }

    #[test]
    fn unsupported_probe_is_reported_as_unsupported_device() {
        let (manager, _camera) = manager_with(SyntheticCameraConfig {
            supported: false,
            ..SyntheticCameraConfig::default()
        });
        let err = manager.probe(&CameraConstraints::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedDevice);
    }

    #[test]
    fn stub_backend_follows_synthetic_settings() {
        let backend = backend_for(
            &CameraConstraints::default(),
            &SyntheticCameraConfig {
                permission: PermissionPolicy::Deny,
                ..SyntheticCameraConfig::default()
            },
        )
        .unwrap();
        let manager = MediaSourceManager::new(backend);
        let err = manager.open(CameraConstraints::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CameraPermissionDenied);
        assert_eq!(manager.active_stream_count(), 0);
    }
}
