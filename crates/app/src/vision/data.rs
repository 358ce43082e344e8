use std::sync::{Arc, Mutex};

use serde::Serialize;

/// One labelled detection kept for the polling endpoint.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Detection {
    pub(crate) label: String,
    /// Model confidence in `[0, 1]`.
    pub(crate) confidence: f32,
}

impl Detection {
    /// Confidence as a percentage rounded to two decimals.
    pub(crate) fn percentage(&self) -> f64 {
        round_to_hundredths(self.confidence as f64 * 100.0)
    }
}

pub(crate) fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Detections for one frame, in detector emission order.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct DetectionBatch {
    pub(crate) frame_number: u64,
    pub(crate) detections: Vec<Detection>,
}

/// Latest completed batch, swapped as a whole by the active stream.
#[derive(Clone, Default)]
pub(crate) struct DetectionStore {
    latest: Arc<Mutex<Arc<DetectionBatch>>>,
}

impl DetectionStore {
    pub(crate) fn publish(&self, batch: DetectionBatch) {
        let batch = Arc::new(batch);
        match self.latest.lock() {
            Ok(mut guard) => *guard = batch,
            Err(poisoned) => *poisoned.into_inner() = batch,
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<DetectionBatch> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct DetectionView<'a> {
    pub(crate) label: &'a str,
    pub(crate) confidence: f64,
}

/// Body of `GET /detections`.
#[derive(Serialize)]
pub(crate) struct DetectionsResponse<'a> {
    pub(crate) detections: Vec<DetectionView<'a>>,
}

impl<'a> DetectionsResponse<'a> {
    pub(crate) fn from_batch(batch: &'a DetectionBatch) -> Self {
        Self {
            detections: batch
                .detections
                .iter()
                .map(|det| DetectionView {
                    label: &det.label,
                    confidence: det.percentage(),
                })
                .collect(),
        }
    }
}
