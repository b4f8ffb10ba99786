//! Pose Mapper.
//!
//! Maps a `LandmarkFrame` in normalized image space to a `PlacementTransform`
//! in render space. The mapping is pure: the same frame and configuration
//! always produce the same transform.
//!
//! Render space puts the placement plane at `plane_z`, with `x` and `y` in
//! `[-1, 1]` and `y` pointing up. Depth is not estimated.

use anyhow::{anyhow, Result};
use nalgebra::{UnitQuaternion, Vector2, Vector3};
use serde::Deserialize;
use std::time::Instant;

use crate::landmark::{HandLandmark, LandmarkFrame};

/// Scale is clamped to this band around the base scale.
const SPAN_SCALE_MIN: f32 = 0.25;
const SPAN_SCALE_MAX: f32 = 4.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacementTransform {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
    /// Capture time of the frame this transform was derived from.
    pub source_frame: Instant,
}

/// How the overlay is oriented.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RotationMode {
    /// Constant orientation in radians: roll about the view axis (z), pitch
    /// about x, yaw about y.
    Fixed {
        #[serde(default)]
        roll: f32,
        #[serde(default)]
        pitch: f32,
        #[serde(default)]
        yaw: f32,
    },
    /// Identity from the mapper; the render loop spins the model about z.
    Spin { radians_per_tick: f32 },
    /// In-plane roll following the wrist to middle-finger direction.
    Tracked,
}

/// How the overlay is sized.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScaleMode {
    Fixed { value: f32 },
    /// `base * span / reference_span`, where span is the normalized
    /// index-MCP to pinky-MCP distance.
    WristSpan { reference_span: f32, base: f32 },
}

impl ScaleMode {
    pub fn validate(&self) -> Result<()> {
        match *self {
            ScaleMode::Fixed { value } if !(value.is_finite() && value > 0.0) => {
                Err(anyhow!("placement.scale.value must be greater than zero"))
            }
            ScaleMode::WristSpan {
                reference_span,
                base,
            } if !(reference_span.is_finite()
                && reference_span > 0.0
                && base.is_finite()
                && base > 0.0) =>
            {
                Err(anyhow!(
                    "placement.scale reference_span and base must be greater than zero"
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapperConfig {
    pub min_confidence: f32,
    pub rotation: RotationMode,
    pub scale: ScaleMode,
    pub plane_z: f32,
    /// Landmark the overlay is anchored to.
    pub anchor: HandLandmark,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            rotation: RotationMode::Spin {
                radians_per_tick: 0.01,
            },
            scale: ScaleMode::Fixed { value: 0.5 },
            plane_z: 0.0,
            anchor: HandLandmark::Wrist,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoseMapper {
    config: MapperConfig,
}

impl PoseMapper {
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Map one frame. `None` means "no update": confidence below threshold,
    /// anchor missing, or non-finite coordinates.
    pub fn map(&self, frame: &LandmarkFrame) -> Option<PlacementTransform> {
        if !(frame.confidence() >= self.config.min_confidence) {
            return None;
        }
        let anchor = frame.point(self.config.anchor)?;
        let render = to_render_xy(anchor.x, anchor.y);
        if !(render.x.is_finite() && render.y.is_finite()) {
            return None;
        }

        Some(PlacementTransform {
            position: Vector3::new(render.x, render.y, self.config.plane_z),
            rotation: self.rotation_for(frame),
            scale: Vector3::repeat(self.scale_for(frame)),
            source_frame: frame.captured_at(),
        })
    }

    /// Apply one frame to `current`. Returns true when it changed.
    pub fn update(&self, current: &mut Option<PlacementTransform>, frame: &LandmarkFrame) -> bool {
        match self.map(frame) {
            Some(transform) => {
                *current = Some(transform);
                true
            }
            None => false,
        }
    }

    fn rotation_for(&self, frame: &LandmarkFrame) -> UnitQuaternion<f32> {
        match self.config.rotation {
            RotationMode::Fixed { roll, pitch, yaw } => {
                UnitQuaternion::from_euler_angles(pitch, yaw, roll)
            }
            RotationMode::Spin { .. } => UnitQuaternion::identity(),
            RotationMode::Tracked => tracked_roll(frame)
                .map(|roll| UnitQuaternion::from_euler_angles(0.0, 0.0, roll))
                .unwrap_or_else(UnitQuaternion::identity),
        }
    }

    fn scale_for(&self, frame: &LandmarkFrame) -> f32 {
        match self.config.scale {
            ScaleMode::Fixed { value } => value,
            ScaleMode::WristSpan {
                reference_span,
                base,
            } => match knuckle_span(frame) {
                Some(span) if span > f32::EPSILON => {
                    (base * span / reference_span).clamp(base * SPAN_SCALE_MIN, base * SPAN_SCALE_MAX)
                }
                _ => base,
            },
        }
    }
}

/// Normalized `[0,1]` image coordinates to render space `[-1,1]`, y up.
pub fn to_render_xy(x: f32, y: f32) -> Vector2<f32> {
    Vector2::new((x - 0.5) * 2.0, -(y - 0.5) * 2.0)
}

/// Counter-clockwise roll of the hand; zero when the fingers point straight up.
fn tracked_roll(frame: &LandmarkFrame) -> Option<f32> {
    let wrist = frame.point(HandLandmark::Wrist)?;
    let middle = frame.point(HandLandmark::MiddleMcp)?;
    let dx = middle.x - wrist.x;
    let dy = -(middle.y - wrist.y);
    if dx.abs() < f32::EPSILON && dy.abs() < f32::EPSILON {
        return None;
    }
    let roll = (-dx).atan2(dy);
    roll.is_finite().then_some(roll)
}

fn knuckle_span(frame: &LandmarkFrame) -> Option<f32> {
    let index = frame.point(HandLandmark::IndexMcp)?;
    let pinky = frame.point(HandLandmark::PinkyMcp)?;
    let span = Vector2::new(index.x - pinky.x, index.y - pinky.y).norm();
    span.is_finite().then_some(span)
}
