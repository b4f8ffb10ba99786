#![cfg(feature = "landmark-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::frame::{PixelFormat, VideoFrame};
use crate::landmark::{HandEstimate, HandLandmark, Landmark, LandmarkEngine};

const INPUT_SIZE: u32 = 224;

/// ONNX hand-landmark engine.
///
/// Expects a single-hand model with a `1x3xHxW` float input and two outputs:
/// 21 landmarks as `x, y, z` in input pixels, and a hand-presence score.
/// Frames are resampled to the model input with nearest-neighbour lookup.
pub struct TractHandEngine {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
}

impl TractHandEngine {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let input_size = INPUT_SIZE as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, input_size, input_size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size: INPUT_SIZE,
        })
    }

    fn build_input(&self, frame: &VideoFrame) -> Result<Tensor> {
        if frame.format != PixelFormat::Rgb24 {
            return Err(anyhow!("hand engine needs RGB frames, got {:?}", frame.format));
        }
        let expected_len = PixelFormat::Rgb24
            .frame_len(frame.width, frame.height)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let pixels = frame.pixels();
        if pixels.len() != expected_len || expected_len == 0 {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let size = self.input_size as usize;
        let src_w = frame.width as usize;
        let src_h = frame.height as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            let sx = (x * src_w / size).min(src_w - 1);
            let sy = (y * src_h / size).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<HandEstimate> {
        let coords = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no landmark output"))?
            .to_array_view::<f32>()
            .context("landmark output tensor was not f32")?;
        let coords: Vec<f32> = coords.iter().copied().collect();
        if coords.len() < HandLandmark::COUNT * 3 {
            return Err(anyhow!(
                "expected {} landmark values, model produced {}",
                HandLandmark::COUNT * 3,
                coords.len()
            ));
        }

        let presence = match outputs.get(1) {
            Some(score) => score
                .to_array_view::<f32>()
                .context("presence output tensor was not f32")?
                .iter()
                .copied()
                .next()
                .unwrap_or(0.0),
            None => 1.0,
        };
        // Some exports emit logits rather than probabilities.
        let confidence = if (0.0..=1.0).contains(&presence) {
            presence
        } else {
            1.0 / (1.0 + (-presence).exp())
        };

        let scale = self.input_size as f32;
        let points = HandLandmark::ALL
            .iter()
            .zip(coords.chunks_exact(3))
            .map(|(&name, xyz)| Landmark {
                name,
                x: (xyz[0] / scale).clamp(0.0, 1.0),
                y: (xyz[1] / scale).clamp(0.0, 1.0),
                z: xyz[2] / scale,
            })
            .collect();
        Ok(HandEstimate { points, confidence })
    }
}

impl LandmarkEngine for TractHandEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, size, size)).into_tensor();
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up inference failed")?;
        Ok(())
    }

    fn estimate(&mut self, frame: &VideoFrame) -> Result<Option<HandEstimate>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let estimate = self.decode(outputs)?;
        if estimate.confidence <= 0.0 {
            return Ok(None);
        }
        Ok(Some(estimate))
    }
}
