//! V4L2 camera backend.
//!
//! Opens a local device node (e.g. /dev/video0), negotiates RGB capture at the
//! requested size and rate, and streams frames through memory-mapped buffers.
//! Open errors are classified the way a browser capture API would report them:
//! EACCES/EPERM as a denied permission, everything else as unavailable.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::io;
use std::path::Path;

use super::{CameraBackend, CameraConstraints, CameraDevice};
use crate::error::{ErrorKind, TryOnError, TryOnResult};
use crate::frame::{FrameStamper, PixelFormat, VideoFrame};

#[derive(Clone, Debug, Default)]
pub struct V4l2Camera;

impl V4l2Camera {
    pub fn new() -> Self {
        Self
    }
}

impl CameraBackend for V4l2Camera {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn probe(&self, constraints: &CameraConstraints) -> TryOnResult<()> {
        if !Path::new(&constraints.device).exists() {
            return Err(TryOnError::new(
                ErrorKind::UnsupportedDevice,
                format!("no capture device node at {}", constraints.device),
            ));
        }
        Ok(())
    }

    fn acquire(&self, constraints: &CameraConstraints) -> TryOnResult<Box<dyn CameraDevice>> {
        let device = v4l::Device::with_path(&constraints.device)
            .map_err(|err| classify_open_error(&constraints.device, err))?;
        let device = V4l2Device::connect(constraints.clone(), device).map_err(|err| {
            TryOnError::new(
                ErrorKind::CameraUnavailable,
                format!("configure {}: {:#}", constraints.device, err),
            )
        })?;
        Ok(Box::new(device))
    }
}

fn classify_open_error(path: &str, err: io::Error) -> TryOnError {
    let kind = match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::CameraPermissionDenied,
        _ => ErrorKind::CameraUnavailable,
    };
    TryOnError::new(kind, format!("open v4l2 device {}: {}", path, err))
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Device {
    constraints: CameraConstraints,
    state: Option<V4l2State>,
    frame_count: u64,
    stamper: FrameStamper,
    active_width: u32,
    active_height: u32,
}

impl V4l2Device {
    fn connect(constraints: CameraConstraints, mut device: v4l::Device) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = constraints.width;
        format.height = constraints.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    constraints.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            anyhow::bail!(
                "device {} does not deliver RGB3 frames (got {})",
                constraints.device,
                format.fourcc
            );
        }

        let params = v4l::video::capture::Parameters::with_fps(constraints.target_fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!(
                "V4l2Camera: failed to set fps on {}: {}",
                constraints.device,
                err
            );
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: streaming {} ({}x{})",
            constraints.device,
            format.width,
            format.height
        );
        Ok(Self {
            active_width: format.width,
            active_height: format.height,
            constraints,
            state: Some(state),
            frame_count: 0,
            stamper: FrameStamper::new(),
        })
    }
}

impl CameraDevice for V4l2Device {
    fn next_frame(&mut self) -> Result<VideoFrame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device released")?;
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        self.frame_count += 1;
        Ok(VideoFrame::new(
            pixels,
            self.active_width,
            self.active_height,
            PixelFormat::Rgb24,
            self.frame_count,
            self.stamper.stamp(),
        ))
    }

    fn stop_tracks(&mut self) {
        // Dropping the stream unmaps the buffers and issues STREAMOFF.
        if self.state.take().is_some() {
            log::info!(
                "V4l2Camera: released {} after {} frames",
                self.constraints.device,
                self.frame_count
            );
        }
    }
}
