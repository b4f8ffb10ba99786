//! Synthetic camera (`stub://` devices).
//!
//! Stands in for the platform capture API in tests and the demo. The
//! permission prompt outcome and its latency are scripted, and every acquired
//! device is counted so callers can assert that no track outlives a session.

use anyhow::Result;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CameraBackend, CameraConstraints, CameraDevice};
use crate::error::{ErrorKind, TryOnError, TryOnResult};
use crate::frame::{FrameStamper, PixelFormat, VideoFrame};

/// Scripted answer to the permission prompt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    #[default]
    Grant,
    Deny,
    /// No device present, or the device is busy.
    Unavailable,
}

#[derive(Clone, Debug)]
pub struct SyntheticCameraConfig {
    pub permission: PermissionPolicy,
    /// How long the simulated prompt stays open before resolving.
    pub prompt_delay: Duration,
    /// Result of the capability probe.
    pub supported: bool,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            permission: PermissionPolicy::Grant,
            prompt_delay: Duration::ZERO,
            supported: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticCamera {
    config: SyntheticCameraConfig,
    live: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig) -> Self {
        Self {
            config,
            live: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Devices acquired and not yet released.
    pub fn live_devices(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn released_devices(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl CameraBackend for SyntheticCamera {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn probe(&self, constraints: &CameraConstraints) -> TryOnResult<()> {
        if !self.config.supported {
            return Err(TryOnError::new(
                ErrorKind::UnsupportedDevice,
                format!("{} reports no capture capability", constraints.device),
            ));
        }
        Ok(())
    }

    fn acquire(&self, constraints: &CameraConstraints) -> TryOnResult<Box<dyn CameraDevice>> {
        if !constraints.device.starts_with("stub://") {
            return Err(TryOnError::new(
                ErrorKind::CameraUnavailable,
                format!("synthetic camera cannot open {}", constraints.device),
            ));
        }
        if !self.config.prompt_delay.is_zero() {
            std::thread::sleep(self.config.prompt_delay);
        }
        match self.config.permission {
            PermissionPolicy::Deny => Err(TryOnError::new(
                ErrorKind::CameraPermissionDenied,
                "user declined camera access",
            )),
            PermissionPolicy::Unavailable => Err(TryOnError::new(
                ErrorKind::CameraUnavailable,
                format!("{} is busy or missing", constraints.device),
            )),
            PermissionPolicy::Grant => {
                self.live.fetch_add(1, Ordering::SeqCst);
                log::info!(
                    "SyntheticCamera: granted {} (synthetic)",
                    constraints.device
                );
                Ok(Box::new(SyntheticDevice::new(
                    constraints.clone(),
                    self.live.clone(),
                    self.released.clone(),
                )))
            }
        }
    }
}

struct SyntheticDevice {
    constraints: CameraConstraints,
    frame_count: u64,
    scene_state: u8,
    stamper: FrameStamper,
    next_due: Option<Instant>,
    released: bool,
    live: Arc<AtomicUsize>,
    released_count: Arc<AtomicUsize>,
}

impl SyntheticDevice {
    fn new(
        constraints: CameraConstraints,
        live: Arc<AtomicUsize>,
        released_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            constraints,
            frame_count: 0,
            scene_state: 0,
            stamper: FrameStamper::new(),
            next_due: None,
            released: false,
            live,
            released_count,
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.constraints.target_fps.max(1)))
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.constraints.width as usize) * (self.constraints.height as usize) * 3;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl CameraDevice for SyntheticDevice {
    fn next_frame(&mut self) -> Result<VideoFrame> {
        let interval = self.frame_interval();
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);

        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Ok(VideoFrame::new(
            pixels,
            self.constraints.width,
            self.constraints.height,
            PixelFormat::Rgb24,
            self.frame_count,
            self.stamper.stamp(),
        ))
    }

    fn stop_tracks(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.released_count.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "SyntheticCamera: released {} after {} frames",
            self.constraints.device,
            self.frame_count
        );
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_constraints() -> CameraConstraints {
        CameraConstraints {
            width: 8,
            height: 4,
            target_fps: 500,
            ..CameraConstraints::default()
        }
    }

    #[test]
    fn synthetic_device_produces_sized_frames() -> Result<()> {
        let camera = SyntheticCamera::new(SyntheticCameraConfig::default());
        let mut device = camera.acquire(&small_constraints()).map_err(anyhow::Error::from)?;
        let frame = device.next_frame()?;
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 4);
        assert_eq!(frame.byte_len(), 8 * 4 * 3);
        assert_eq!(frame.sequence, 1);
        device.stop_tracks();
        Ok(())
    }

    #[test]
    fn non_stub_devices_are_unavailable() {
        let camera = SyntheticCamera::new(SyntheticCameraConfig::default());
        let constraints = CameraConstraints {
            device: "/dev/video0".to_string(),
            ..CameraConstraints::default()
        };
        let err = camera.acquire(&constraints).err().expect("must fail");
        assert_eq!(err.kind, ErrorKind::CameraUnavailable);
    }

    #[test]
    fn dropping_device_releases_once() {
        let camera = SyntheticCamera::new(SyntheticCameraConfig::default());
        let mut device = camera.acquire(&small_constraints()).unwrap();
        assert_eq!(camera.live_devices(), 1);
        device.stop_tracks();
        drop(device);
        assert_eq!(camera.live_devices(), 0);
        assert_eq!(camera.released_devices(), 1);
    }
}
