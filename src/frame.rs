//! Video frames flowing from the camera to the detector and the video layer.
//!
//! - `VideoFrame`: one captured frame. Pixels are shared and read-only, so the
//!   detector slot and the video layer can hold the same frame without copying.
//! - `FrameStamper`: hands out strictly increasing capture instants.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pixel layout of a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Nv12,
}

impl PixelFormat {
    /// Expected byte length for a frame of the given size.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let plane = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Rgb24 => plane.checked_mul(3),
            PixelFormat::Nv12 => plane.checked_add(plane / 2),
        }
    }
}

#[derive(Clone, Debug)]
pub struct VideoFrame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Position in the capture stream, starting at 1.
    pub sequence: u64,
    /// Strictly increasing within one capture stream.
    pub captured_at: Instant,
}

impl VideoFrame {
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
        captured_at: Instant,
    ) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            format,
            sequence,
            captured_at,
        }
    }

    /// Read-only pixel access. Consumers must not retain the slice past use.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Issues capture instants that never repeat or go backwards, even when the
/// platform clock is coarser than the frame rate.
#[derive(Debug, Default)]
pub struct FrameStamper {
    last: Option<Instant>,
}

impl FrameStamper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&mut self) -> Instant {
        self.stamp_at(Instant::now())
    }

    pub fn stamp_at(&mut self, now: Instant) -> Instant {
        let stamped = match self.last {
            Some(last) if now <= last => last + Duration::from_nanos(1),
            _ => now,
        };
        self.last = Some(stamped);
        stamped
    }
}
