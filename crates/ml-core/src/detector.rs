use std::path::{Path, PathBuf};

use thiserror::Error;
use video_ingest::Frame;

/// Axis-aligned box in frame pixel coordinates, corners `(x1, y1)`-`(x2, y2)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

/// Single detection as emitted by the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub class_id: i64,
    pub confidence: f32,
}

/// Opaque object detector.
///
/// Implementations return detections with `confidence >= threshold`, must not
/// mutate the frame, and are deterministic for identical inputs.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame, confidence_threshold: f32) -> anyhow::Result<Vec<RawDetection>>;

    /// Human readable backend description for startup logs.
    fn describe(&self) -> String {
        "detector".to_string()
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load model from {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },
    #[error("cannot load {}: built without the `with-tch` feature", path.display())]
    BackendUnavailable { path: PathBuf },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Load the model at `path` once, failing fatally if it cannot be used.
#[cfg(feature = "with-tch")]
pub fn load_detector(path: &Path, use_cpu: bool) -> Result<Box<dyn Detector>, DetectorError> {
    let device = if use_cpu {
        tch::Device::Cpu
    } else {
        tch::Device::cuda_if_available()
    };
    let detector = crate::torchscript::TorchScriptDetector::load(path, device)?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "with-tch"))]
pub fn load_detector(path: &Path, _use_cpu: bool) -> Result<Box<dyn Detector>, DetectorError> {
    Err(DetectorError::BackendUnavailable {
        path: path.to_path_buf(),
    })
}

/// Greedy class-wise non-maximum suppression; output sorted by confidence.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|existing| {
            existing.class_id == candidate.class_id && existing.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
