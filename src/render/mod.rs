//! Scene/Render Loop.
//!
//! A free-running thread ticks at the display rate. Each tick reads the
//! newest placement and video frame from shared cells, applies the placement
//! (plus spin and view controls) to the model node, and presents one
//! `CompositeFrame` to the `RenderTarget`. The loop never waits on the
//! detector or the asset loader: a missing placement holds the previous one,
//! a missing video frame re-presents the last.

mod scene;

use anyhow::Result;
use nalgebra::{Point2, Point3, UnitQuaternion, Vector3};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{ErrorKind, TryOnError, TryOnResult};
use crate::frame::VideoFrame;
use crate::pose::PlacementTransform;

pub use scene::{HemisphereLight, ModelNode, PerspectiveCamera, Scene, SceneConfig};

/// Latest-value cell shared between one writer and many readers.
#[derive(Debug)]
pub struct SharedCell<T> {
    value: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for SharedCell<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
        }
    }
}

impl<T> Default for SharedCell<T> {
    fn default() -> Self {
        Self {
            value: Arc::new(RwLock::new(None)),
        }
    }
}

impl<T: Clone> SharedCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<T> {
        self.value
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, value: T) {
        *self
            .value
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value);
    }

    pub fn clear(&self) {
        *self
            .value
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Where the overlay landed on screen for one tick.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayDraw {
    pub asset_id: String,
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
    /// Projected model origin in target pixels, when on screen.
    pub screen_center: Option<Point2<f32>>,
    /// Projected bounding radius in pixels.
    pub screen_radius: Option<f32>,
    pub source_frame: Instant,
}

/// One presented frame: the video layer plus the optional overlay.
#[derive(Clone, Debug)]
pub struct CompositeFrame {
    pub tick: u64,
    pub video: Option<VideoFrame>,
    pub overlay: Option<OverlayDraw>,
}

/// Rendering surface provided by the host.
pub trait RenderTarget: Send {
    /// Drawable size in pixels.
    fn size(&self) -> (u32, u32);

    fn present(&mut self, frame: &CompositeFrame) -> Result<()>;

    /// Release the surface. Called once when the loop stops.
    fn release(&mut self);
}

/// Summary of what a `RecordingTarget` has seen.
#[derive(Clone, Debug, Default)]
pub struct RecordedFrames {
    pub presented: u64,
    pub with_video: u64,
    pub with_overlay: u64,
    pub last_overlay: Option<OverlayDraw>,
    pub last_video_sequence: Option<u64>,
    pub released: bool,
}

/// In-memory target for tests and headless runs.
#[derive(Clone)]
pub struct RecordingTarget {
    size: (u32, u32),
    log: Arc<Mutex<RecordedFrames>>,
}

impl RecordingTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            log: Arc::new(Mutex::new(RecordedFrames::default())),
        }
    }

    pub fn snapshot(&self) -> RecordedFrames {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl RenderTarget for RecordingTarget {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn present(&mut self, frame: &CompositeFrame) -> Result<()> {
        let mut log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        log.presented += 1;
        if let Some(video) = &frame.video {
            log.with_video += 1;
            log.last_video_sequence = Some(video.sequence);
        }
        if let Some(overlay) = &frame.overlay {
            log.with_overlay += 1;
            log.last_overlay = Some(overlay.clone());
        }
        Ok(())
    }

    fn release(&mut self) {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .released = true;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub ticks: u64,
    pub present_errors: u64,
}

#[derive(Default)]
struct ViewRequests {
    zoom_factor: Option<f32>,
    reset_rotation: bool,
}

struct Renderer {
    config: SceneConfig,
    scene: Arc<Mutex<Scene>>,
    target: Option<Box<dyn RenderTarget>>,
    placement: SharedCell<PlacementTransform>,
    video: SharedCell<VideoFrame>,
    view: ViewRequests,
    zoom: f32,
}

/// Drives the scene at display cadence.
pub struct RenderLoop {
    renderer: Arc<Mutex<Renderer>>,
    ticks: Arc<AtomicU64>,
    present_errors: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stopped: bool,
}

impl RenderLoop {
    pub fn new(
        config: SceneConfig,
        scene: Arc<Mutex<Scene>>,
        placement: SharedCell<PlacementTransform>,
        video: SharedCell<VideoFrame>,
    ) -> Self {
        Self {
            renderer: Arc::new(Mutex::new(Renderer {
                config,
                scene,
                target: None,
                placement,
                video,
                view: ViewRequests::default(),
                zoom: 1.0,
            })),
            ticks: Arc::new(AtomicU64::new(0)),
            present_errors: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: None,
            stopped: false,
        }
    }

    /// Attach the target without starting the thread; frames are produced by
    /// calling `tick` directly.
    pub fn attach(&mut self, target: Box<dyn RenderTarget>) -> TryOnResult<()> {
        if self.stopped {
            return Err(TryOnError::new(
                ErrorKind::InvalidTransition,
                "render loop already stopped",
            ));
        }
        let (width, height) = target.size();
        if width == 0 || height == 0 {
            return Err(TryOnError::new(
                ErrorKind::UnsupportedDevice,
                format!("render surface has no drawable area ({}x{})", width, height),
            ));
        }
        let mut renderer = lock(&self.renderer);
        lock(&renderer.scene)
            .camera
            .set_aspect(width as f32 / height as f32);
        renderer.target = Some(target);
        Ok(())
    }

    /// Attach the target and start ticking at the configured rate.
    pub fn start(&mut self, target: Box<dyn RenderTarget>) -> TryOnResult<()> {
        if self.thread.is_some() {
            return Err(TryOnError::new(
                ErrorKind::InvalidTransition,
                "render loop already running",
            ));
        }
        self.attach(target)?;

        let fps = lock(&self.renderer).config.target_fps.max(1);
        let interval = Duration::from_secs_f64(1.0 / f64::from(fps));
        let renderer = self.renderer.clone();
        let ticks = self.ticks.clone();
        let errors = self.present_errors.clone();
        let shutdown = self.shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("tryon-render".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while !shutdown.load(Ordering::SeqCst) {
                    render_once(&renderer, &ticks, &errors);
                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| {
                TryOnError::new(
                    ErrorKind::UnsupportedDevice,
                    format!("failed to spawn render thread: {}", e),
                )
            })?;
        self.thread = Some(thread);
        log::info!("RenderLoop: started at {} fps", fps);
        Ok(())
    }

    /// Render one frame now.
    pub fn tick(&self) {
        if self.stopped {
            return;
        }
        render_once(&self.renderer, &self.ticks, &self.present_errors);
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Multiply the overlay zoom; applied on the next tick.
    pub fn adjust_zoom(&self, factor: f32) {
        let mut renderer = lock(&self.renderer);
        let pending = renderer.view.zoom_factor.unwrap_or(1.0);
        renderer.view.zoom_factor = Some(pending * factor);
    }

    /// Zero the accumulated spin on the next tick.
    pub fn reset_rotation(&self) {
        lock(&self.renderer).view.reset_rotation = true;
    }

    pub fn stats(&self) -> RenderStats {
        RenderStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            present_errors: self.present_errors.load(Ordering::Relaxed),
        }
    }

    /// Stop ticking, detach the model, dispose the scene and release the
    /// target. Safe before `start` and on repeated calls.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("RenderLoop: render thread panicked");
            }
        }
        if self.stopped {
            return;
        }
        self.stopped = true;

        let mut renderer = lock(&self.renderer);
        {
            let mut scene = lock(&renderer.scene);
            scene.remove_model();
            scene.dispose();
        }
        if let Some(mut target) = renderer.target.take() {
            target.release();
        }
        log::info!(
            "RenderLoop: stopped after {} ticks",
            self.ticks.load(Ordering::Relaxed)
        );
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn render_once(renderer: &Mutex<Renderer>, ticks: &AtomicU64, errors: &AtomicU64) {
    let mut guard = lock(renderer);
    let renderer = &mut *guard;
    let Some(target) = renderer.target.as_mut() else {
        return;
    };
    let video = renderer.video.get();
    let latest = renderer.placement.get();

    if let Some(factor) = renderer.view.zoom_factor.take() {
        renderer.zoom = scene::clamp_zoom(renderer.zoom * factor);
    }
    let reset_rotation = std::mem::take(&mut renderer.view.reset_rotation);

    let overlay = {
        let mut scene = lock(&renderer.scene);
        if scene.is_disposed() {
            return;
        }
        let spin_per_tick = renderer.config.spin_per_tick;
        let zoom = renderer.zoom;
        if let Some(node) = scene.model_mut() {
            if let Some(placement) = latest {
                node.placement = Some(placement);
            }
            if reset_rotation {
                node.spin = 0.0;
            } else if node.placement.is_some() {
                node.spin = (node.spin + spin_per_tick) % std::f32::consts::TAU;
            }
            node.zoom = zoom;
        }
        let (width, height) = target.size();
        scene
            .model()
            .and_then(|node| overlay_for(node, &scene.camera, width, height))
    };

    let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
    let frame = CompositeFrame {
        tick,
        video,
        overlay,
    };
    if let Err(err) = target.present(&frame) {
        let count = errors.fetch_add(1, Ordering::Relaxed) + 1;
        if count == 1 || count % 100 == 0 {
            log::warn!("RenderLoop: present failed ({} so far): {:#}", count, err);
        }
    }
}

fn overlay_for(
    node: &ModelNode,
    camera: &PerspectiveCamera,
    width: u32,
    height: u32,
) -> Option<OverlayDraw> {
    let placement = node.placement()?;
    let rotation = node.world_rotation()?;
    let scale = node.world_scale()?;
    let origin = Point3::from(placement.position);
    let screen_center = camera.project(&origin, width, height);
    let screen_radius = node.world_radius().and_then(|radius| {
        let edge = camera.project(&(origin + Vector3::new(radius, 0.0, 0.0)), width, height)?;
        let center = screen_center?;
        Some((edge - center).norm())
    });
    Some(OverlayDraw {
        asset_id: node.asset_id.clone(),
        position: placement.position,
        rotation,
        scale,
        screen_center,
        screen_radius,
        source_frame: placement.source_frame,
    })
}
