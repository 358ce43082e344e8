//! TorchScript-backed detector for YOLOv8-style exports.
//!
//! The export is expected to produce `[1, 4 + classes, predictions]`, each
//! prediction holding a centre-format box followed by per-class scores.

use std::{convert::TryFrom, path::Path, sync::Mutex};

use anyhow::{Result, anyhow, bail};
use image::{RgbImage, imageops::FilterType};
use tch::{CModule, Device, Kind, Tensor};
use tracing::info;
use video_ingest::{Frame, FrameFormat};

use crate::{
    detector::{BoundingBox, Detector, DetectorError, RawDetection, non_max_suppression},
    labels::CLASS_NAMES,
};

const DEFAULT_INPUT_SIZE: (i64, i64) = (640, 640);
const NMS_IOU_THRESHOLD: f32 = 0.45;
const MAX_DETECTIONS: usize = 300;

pub struct TorchScriptDetector {
    module: Mutex<CModule>,
    device: Device,
    input_size: (i64, i64),
}

impl TorchScriptDetector {
    /// Load a TorchScript module onto `device`.
    pub fn load(path: &Path, device: Device) -> Result<Self, DetectorError> {
        let mut module =
            CModule::load_on_device(path, device).map_err(|err| DetectorError::ModelLoad {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        module.set_eval();
        info!("Model loaded successfully from {} on {:?}", path.display(), device);
        Ok(Self {
            module: Mutex::new(module),
            device,
            input_size: DEFAULT_INPUT_SIZE,
        })
    }

    /// Resize the BGR frame to the model input and build a normalised NCHW tensor.
    fn frame_to_tensor(&self, frame: &Frame) -> Result<Tensor> {
        if frame.format != FrameFormat::Bgr8 {
            bail!("unsupported frame format");
        }
        let rgb: Vec<u8> = frame
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect();
        let image = RgbImage::from_raw(frame.width as u32, frame.height as u32, rgb)
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;

        let (in_w, in_h) = self.input_size;
        let resized = image::imageops::resize(&image, in_w as u32, in_h as u32, FilterType::Triangle);

        let tensor = Tensor::from_slice(resized.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, in_h, in_w, 3])
            .permute([0, 3, 1, 2])
            / 255.0;
        Ok(tensor)
    }

    fn decode(&self, output: &Tensor, frame: &Frame, threshold: f32) -> Result<Vec<RawDetection>> {
        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 {
            bail!("unexpected detector output shape: {shape:?}");
        }
        if shape[1] < 5 {
            bail!("detector output requires at least 5 channels, got {}", shape[1]);
        }

        let preds = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows = Vec::<Vec<f32>>::try_from(&preds)?;

        let (in_w, in_h) = self.input_size;
        let scale_x = frame.width as f32 / in_w as f32;
        let scale_y = frame.height as f32 / in_h as f32;

        let mut detections = Vec::new();
        for row in rows {
            let Some((class_idx, score)) = row[4..]
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            if score < threshold {
                continue;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            detections.push(RawDetection {
                bbox: BoundingBox::new(
                    (cx - w / 2.0) * scale_x,
                    (cy - h / 2.0) * scale_y,
                    (cx + w / 2.0) * scale_x,
                    (cy + h / 2.0) * scale_y,
                ),
                class_id: class_idx as i64,
                confidence: score.min(1.0),
            });
        }

        let mut kept = non_max_suppression(detections, NMS_IOU_THRESHOLD);
        kept.truncate(MAX_DETECTIONS);
        Ok(kept)
    }
}

impl Detector for TorchScriptDetector {
    fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        let input = self.frame_to_tensor(frame)?;
        let output = {
            let module = self
                .module
                .lock()
                .map_err(|_| anyhow!("detector module poisoned"))?;
            tch::no_grad(|| module.forward_ts(&[input]))
                .map_err(|err| DetectorError::Inference(err.to_string()))?
        };
        self.decode(&output, frame, confidence_threshold)
    }

    fn describe(&self) -> String {
        format!(
            "TorchScript on {:?} ({}x{}, {} classes)",
            self.device,
            self.input_size.0,
            self.input_size.1,
            CLASS_NAMES.len()
        )
    }
}
