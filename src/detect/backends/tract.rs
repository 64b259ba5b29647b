#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::prep::{letterbox, non_max_suppression};
use crate::detect::result::BoundingBox;

/// COCO class index for "person".
const PERSON_CLASS: usize = 0;

/// Tract-based YOLO detector for ONNX exports.
///
/// Accepts both common output layouts:
/// - `[1, N, 5 + C]` (box, objectness, class scores)
/// - `[1, 4 + C, N]` (box, class scores; transposed)
///
/// Only person detections are returned.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for `input_size` square input.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let side = self.input_size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            image.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, confidence: f32) -> Result<Vec<BoundingBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let rows = view
            .into_shape((shape[1], shape[2]))
            .context("reshape YOLO output")?;

        let mut boxes = Vec::new();
        let transposed = shape[1] < shape[2];
        let (count, width) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        let at = |i: usize, j: usize| if transposed { rows[[j, i]] } else { rows[[i, j]] };

        for i in 0..count {
            let score = if transposed {
                if width <= 4 + PERSON_CLASS {
                    continue;
                }
                at(i, 4 + PERSON_CLASS)
            } else {
                if width <= 5 + PERSON_CLASS {
                    continue;
                }
                at(i, 4) * at(i, 5 + PERSON_CLASS)
            };
            if score < confidence {
                continue;
            }
            let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
            boxes.push(BoundingBox::new(
                cx - w / 2.0,
                cy - h / 2.0,
                cx + w / 2.0,
                cy + h / 2.0,
                score,
            ));
        }
        Ok(boxes)
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, image: &RgbImage, confidence: f32, iou: f32) -> Result<Vec<BoundingBox>> {
        let lb = letterbox(image, self.input_size);
        let input = self.build_input(&lb.image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let boxes = self.decode(outputs, confidence)?;
        Ok(non_max_suppression(boxes, iou)
            .into_iter()
            .map(|b| lb.unmap(b))
            .collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.infer(&blank, 1.0, 0.5).map(|_| ())
    }
}
