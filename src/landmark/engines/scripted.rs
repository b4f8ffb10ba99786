use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::frame::VideoFrame;
use crate::landmark::{HandEstimate, HandLandmark, Landmark, LandmarkEngine};

/// Hand shape in units of the index-MCP to pinky-MCP span, hand pointing up
/// in image space (y grows downwards).
const HAND_OFFSETS: [(f32, f32); HandLandmark::COUNT] = [
    (0.0, 0.0),
    (-0.45, -0.25),
    (-0.75, -0.55),
    (-0.95, -0.85),
    (-1.1, -1.1),
    (-0.5, -1.35),
    (-0.55, -1.85),
    (-0.58, -2.15),
    (-0.6, -2.45),
    (0.0, -1.5),
    (0.0, -2.05),
    (0.0, -2.4),
    (0.0, -2.7),
    (0.27, -1.45),
    (0.29, -1.95),
    (0.31, -2.25),
    (0.33, -2.5),
    (0.5, -1.35),
    (0.56, -1.7),
    (0.6, -1.95),
    (0.64, -2.15),
];

const DEFAULT_SPAN: f32 = 0.08;

/// Build a plausible 21-point hand around `wrist`.
///
/// `span` is the normalized index-MCP to pinky-MCP distance. `roll` rotates
/// the hand counter-clockwise on screen.
pub fn synthetic_hand(wrist: (f32, f32), span: f32, roll: f32) -> Vec<Landmark> {
    let (sin, cos) = roll.sin_cos();
    HandLandmark::ALL
        .iter()
        .zip(HAND_OFFSETS.iter())
        .map(|(&name, &(ox, oy))| {
            // Rotate in y-up space, then flip back to image space.
            let (ux, uy) = (ox * span, -oy * span);
            let rx = ux * cos - uy * sin;
            let ry = ux * sin + uy * cos;
            Landmark {
                name,
                x: wrist.0 + rx,
                y: wrist.1 - ry,
                z: 0.0,
            }
        })
        .collect()
}

/// One scripted engine answer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScriptStep {
    Hand {
        x: f32,
        y: f32,
        span: f32,
        roll: f32,
        confidence: f32,
    },
    Miss,
    Fail,
}

impl ScriptStep {
    pub fn hand(x: f32, y: f32, confidence: f32) -> Self {
        ScriptStep::Hand {
            x,
            y,
            span: DEFAULT_SPAN,
            roll: 0.0,
            confidence,
        }
    }
}

enum Script {
    Steps { steps: Vec<ScriptStep>, cursor: usize },
    Orbit {
        center: (f32, f32),
        radius: f32,
        period_frames: u32,
        confidence: f32,
    },
}

/// Deterministic engine for tests and the demo.
///
/// Either replays a fixed list of steps (the last step repeats) or moves a
/// hand along a circle keyed on the frame sequence number.
pub struct ScriptedEngine {
    script: Script,
    latency: Duration,
    warm_up_error: Option<String>,
    frames_seen: u64,
}

impl ScriptedEngine {
    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        Self::with_script(Script::Steps { steps, cursor: 0 })
    }

    pub fn orbit(center: (f32, f32), radius: f32, period_frames: u32, confidence: f32) -> Self {
        Self::with_script(Script::Orbit {
            center,
            radius,
            period_frames: period_frames.max(1),
            confidence,
        })
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            latency: Duration::ZERO,
            warm_up_error: None,
            frames_seen: 0,
        }
    }

    /// Simulated inference time per frame.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `warm_up` fail, as a missing model would.
    pub fn failing_warm_up(mut self, reason: impl Into<String>) -> Self {
        self.warm_up_error = Some(reason.into());
        self
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    fn next_step(&mut self, frame: &VideoFrame) -> ScriptStep {
        match &mut self.script {
            Script::Steps { steps, cursor } => {
                let Some(last) = steps.len().checked_sub(1) else {
                    return ScriptStep::Miss;
                };
                let step = steps[(*cursor).min(last)];
                *cursor += 1;
                step
            }
            Script::Orbit {
                center,
                radius,
                period_frames,
                confidence,
            } => {
                let phase = (frame.sequence % u64::from(*period_frames)) as f32
                    / *period_frames as f32;
                let angle = phase * std::f32::consts::TAU;
                ScriptStep::hand(
                    center.0 + *radius * angle.cos(),
                    center.1 + *radius * angle.sin(),
                    *confidence,
                )
            }
        }
    }
}

impl LandmarkEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn warm_up(&mut self) -> Result<()> {
        match &self.warm_up_error {
            Some(reason) => Err(anyhow!("scripted engine warm-up failed: {}", reason)),
            None => Ok(()),
        }
    }

    fn estimate(&mut self, frame: &VideoFrame) -> Result<Option<HandEstimate>> {
        self.frames_seen += 1;
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match self.next_step(frame) {
            ScriptStep::Hand {
                x,
                y,
                span,
                roll,
                confidence,
            } => Ok(Some(HandEstimate {
                points: synthetic_hand((x, y), span, roll),
                confidence,
            })),
            ScriptStep::Miss => Ok(None),
            ScriptStep::Fail => Err(anyhow!("scripted inference failure")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::time::Instant;

    fn frame(sequence: u64) -> VideoFrame {
        VideoFrame::new(vec![0; 12], 2, 2, PixelFormat::Rgb24, sequence, Instant::now())
    }

    #[test]
    fn synthetic_hand_places_wrist_exactly() {
        let hand = synthetic_hand((0.3, 0.6), 0.1, 0.7);
        assert_eq!(hand.len(), HandLandmark::COUNT);
        assert_eq!(hand[0].name, HandLandmark::Wrist);
        assert!((hand[0].x - 0.3).abs() < 1e-6);
        assert!((hand[0].y - 0.6).abs() < 1e-6);
    }

    #[test]
    fn upright_hand_has_middle_finger_above_wrist() {
        let hand = synthetic_hand((0.5, 0.5), 0.1, 0.0);
        let middle = hand[HandLandmark::MiddleMcp.index()];
        assert!((middle.x - 0.5).abs() < 1e-6);
        assert!(middle.y < 0.5);
    }

    #[test]
    fn last_step_repeats() -> Result<()> {
        let mut engine =
            ScriptedEngine::from_steps(vec![ScriptStep::Miss, ScriptStep::hand(0.5, 0.5, 0.9)]);
        assert!(engine.estimate(&frame(1))?.is_none());
        assert!(engine.estimate(&frame(2))?.is_some());
        assert!(engine.estimate(&frame(3))?.is_some());
        assert_eq!(engine.frames_seen(), 3);
        Ok(())
    }

    #[test]
    fn fail_step_reports_error() {
        let mut engine = ScriptedEngine::from_steps(vec![ScriptStep::Fail]);
        assert!(engine.estimate(&frame(1)).is_err());
    }

    #[test]
    fn orbit_follows_sequence() -> Result<()> {
        let mut engine = ScriptedEngine::orbit((0.5, 0.5), 0.2, 4, 0.9);
        let start = engine.estimate(&frame(0))?.unwrap();
        let quarter = engine.estimate(&frame(1))?.unwrap();
        assert!((start.points[0].x - 0.7).abs() < 1e-5);
        assert!((quarter.points[0].y - 0.7).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn warm_up_failure_is_reported() {
        let mut engine = ScriptedEngine::from_steps(vec![]).failing_warm_up("model missing");
        let err = engine.warm_up().unwrap_err();
        assert!(err.to_string().contains("model missing"));
    }
}
