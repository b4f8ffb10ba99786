//! Landmark detection.
//!
//! - `LandmarkEngine`: hand/pose estimation backend (scripted, or ONNX via
//!   the landmark-tract feature)
//! - `DetectorAdapter`: runs an engine off the presentation path behind a
//!   latest-frame-wins input slot and publishes `DetectionEvent`s into a
//!   capacity-1 output slot
//! - `LandmarkFrame`: one immutable detection result in normalized space

mod adapter;
pub mod engines;
mod slot;

use anyhow::Result;
use std::time::Instant;

use crate::frame::VideoFrame;

pub use adapter::{DetectorAdapter, DetectorConfig, DetectorStats, FrameSubmitter};
pub use engines::{engine_for, synthetic_hand, ScriptStep, ScriptedEngine};
pub use slot::{LatestSlot, SlotRecv};

/// The 21 hand landmarks, in the conventional hand-model index order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandLandmark {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexMcp,
    IndexPip,
    IndexDip,
    IndexTip,
    MiddleMcp,
    MiddlePip,
    MiddleDip,
    MiddleTip,
    RingMcp,
    RingPip,
    RingDip,
    RingTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

impl HandLandmark {
    pub const COUNT: usize = 21;

    pub const ALL: [HandLandmark; Self::COUNT] = [
        HandLandmark::Wrist,
        HandLandmark::ThumbCmc,
        HandLandmark::ThumbMcp,
        HandLandmark::ThumbIp,
        HandLandmark::ThumbTip,
        HandLandmark::IndexMcp,
        HandLandmark::IndexPip,
        HandLandmark::IndexDip,
        HandLandmark::IndexTip,
        HandLandmark::MiddleMcp,
        HandLandmark::MiddlePip,
        HandLandmark::MiddleDip,
        HandLandmark::MiddleTip,
        HandLandmark::RingMcp,
        HandLandmark::RingPip,
        HandLandmark::RingDip,
        HandLandmark::RingTip,
        HandLandmark::PinkyMcp,
        HandLandmark::PinkyPip,
        HandLandmark::PinkyDip,
        HandLandmark::PinkyTip,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// A named point in normalized `[0,1]` image space (z is relative depth).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Landmark {
    pub name: HandLandmark,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One detection result. Immutable once emitted.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkFrame {
    points: Vec<Landmark>,
    confidence: f32,
    captured_at: Instant,
}

impl LandmarkFrame {
    pub fn new(points: Vec<Landmark>, confidence: f32, captured_at: Instant) -> Self {
        Self {
            points,
            confidence,
            captured_at,
        }
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn point(&self, name: HandLandmark) -> Option<&Landmark> {
        self.points.iter().find(|p| p.name == name)
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// What the engine saw in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct HandEstimate {
    pub points: Vec<Landmark>,
    pub confidence: f32,
}

/// Published by the adapter for every processed frame.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionEvent {
    Landmarks(LandmarkFrame),
    /// Transient: nothing to track in this frame.
    NoLandmarks { captured_at: Instant },
}

impl DetectionEvent {
    pub fn captured_at(&self) -> Instant {
        match self {
            DetectionEvent::Landmarks(frame) => frame.captured_at(),
            DetectionEvent::NoLandmarks { captured_at } => *captured_at,
        }
    }
}

/// Hand-landmark estimation backend.
///
/// Implementations receive frames on the adapter's worker thread and must not
/// retain pixel data beyond the `estimate` call.
pub trait LandmarkEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Load weights / allocate buffers. Failure disables tracking.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Estimate one hand. `Ok(None)` means no hand in view.
    fn estimate(&mut self, frame: &VideoFrame) -> Result<Option<HandEstimate>>;
}
