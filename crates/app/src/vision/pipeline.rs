//! Per-client frame pipeline: read → detect → annotate → encode → chunk.
//!
//! `FramePipeline` is an iterator of multipart chunks driven by an explicit
//! state machine. It yields one chunk per completed frame and ends (for good)
//! when the camera cannot be recovered, the detector breaks its contract, or
//! shutdown is requested.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use image::ImageError;
use ml_core::{Detector, RawDetection, UnknownClassId, class_name};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use video_ingest::Frame;

use crate::vision::{
    annotation::{LabelledDetection, annotate},
    camera::CameraLease,
    config::{StreamConfig, StreamSettings},
    data::DetectionStore,
    encoding::{StreamEncoder, wrap},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PipelineState {
    Uninitialized,
    CameraReady,
    Streaming,
    Recovering,
    Terminated,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::Uninitialized => "uninitialized",
            PipelineState::CameraReady => "camera-ready",
            PipelineState::Streaming => "streaming",
            PipelineState::Recovering => "recovering",
            PipelineState::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// Why a single frame could not be turned into a chunk.
#[derive(Debug, Error)]
pub(crate) enum FrameProcessingError {
    #[error("detection failed: {0:#}")]
    Detect(anyhow::Error),
    #[error(transparent)]
    UnknownClass(#[from] UnknownClassId),
    #[error("JPEG encode failed: {0}")]
    Encode(#[from] ImageError),
}

impl FrameProcessingError {
    /// Contract violations end the stream; everything else skips the frame.
    fn is_fatal(&self) -> bool {
        matches!(self, FrameProcessingError::UnknownClass(_))
    }
}

/// Resolve class names and drop anything under the stream threshold.
pub(crate) fn label_detections(
    raw: Vec<RawDetection>,
    threshold: f32,
) -> Result<Vec<LabelledDetection>, UnknownClassId> {
    let mut labelled = Vec::with_capacity(raw.len());
    for det in raw {
        let label = class_name(det.class_id)?;
        if det.confidence < threshold {
            continue;
        }
        labelled.push(LabelledDetection {
            bbox: det.bbox,
            label,
            confidence: det.confidence,
        });
    }
    Ok(labelled)
}

/// Reopens allowed in a row without a frame read in between.
const MAX_REOPENS_WITHOUT_FRAME: u32 = 5;

/// Reports whether the consumer of the stream has gone away.
type DisconnectCheck = Box<dyn Fn() -> bool + Send>;

pub(crate) struct FramePipeline {
    lease: CameraLease,
    detector: Arc<dyn Detector>,
    store: DetectionStore,
    config: StreamConfig,
    encoder: StreamEncoder,
    backoff: Duration,
    shutdown: Arc<AtomicBool>,
    disconnected: Option<DisconnectCheck>,
    state: PipelineState,
    frame_number: u64,
    reopens_without_frame: u32,
}

impl FramePipeline {
    pub(crate) fn new(
        lease: CameraLease,
        detector: Arc<dyn Detector>,
        store: DetectionStore,
        config: StreamConfig,
        settings: StreamSettings,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            lease,
            detector,
            store,
            config,
            encoder: StreamEncoder::new(settings.jpeg_quality),
            backoff: settings.backoff,
            shutdown,
            disconnected: None,
            state: PipelineState::Uninitialized,
            frame_number: 0,
            reopens_without_frame: 0,
        }
    }

    /// End the stream as soon as `check` reports the client is gone, even
    /// while no chunk is being produced.
    pub(crate) fn with_disconnect_check(
        mut self,
        check: impl Fn() -> bool + Send + 'static,
    ) -> Self {
        self.disconnected = Some(Box::new(check));
        self
    }

    fn client_gone(&self) -> bool {
        self.disconnected.as_ref().is_some_and(|check| check())
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "pipeline state change");
            self.state = next;
        }
    }

    fn terminate(&mut self, reason: &str) {
        if self.state != PipelineState::Terminated {
            info!(
                device = self.lease.device_index(),
                frames = self.frame_number,
                "Stream terminated: {reason}"
            );
            metrics::counter!("vision_stream_sessions_total", "outcome" => reason.to_string())
                .increment(1);
        }
        self.transition(PipelineState::Terminated);
    }

    /// Detect, annotate and encode one frame. The store is only updated once
    /// the frame has fully encoded.
    fn process(&mut self, mut frame: Frame) -> Result<Vec<u8>, FrameProcessingError> {
        let frame_number = self.frame_number.wrapping_add(1);
        let frame_span = tracing::debug_span!(
            "frame",
            frame = frame_number,
            captured_ms = frame.timestamp_ms
        );
        let _frame_guard = frame_span.enter();

        let started = Instant::now();
        let raw = self
            .detector
            .detect(&frame, self.config.confidence_threshold)
            .map_err(FrameProcessingError::Detect)?;
        metrics::histogram!("vision_stage_latency_seconds", "stage" => "detect")
            .record(started.elapsed().as_secs_f64());

        let labelled = label_detections(raw, self.config.confidence_threshold)?;
        if !labelled.is_empty() {
            debug!("frame #{frame_number}: {} detection(s)", labelled.len());
        }

        let started = Instant::now();
        let batch = annotate(&mut frame, &labelled, &self.config, frame_number);
        let jpeg = self.encoder.encode(&frame)?;
        metrics::histogram!("vision_stage_latency_seconds", "stage" => "encode")
            .record(started.elapsed().as_secs_f64());

        self.store.publish(batch);
        self.frame_number = frame_number;
        Ok(wrap(&jpeg))
    }
}

impl Iterator for FramePipeline {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.state == PipelineState::Terminated {
                return None;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                self.terminate("shutdown");
                return None;
            }
            if self.client_gone() {
                self.terminate("client-closed");
                return None;
            }

            match self.state {
                PipelineState::Uninitialized => match self.lease.ensure_open() {
                    Ok(()) => self.transition(PipelineState::CameraReady),
                    Err(err) => {
                        error!("Error initializing camera: {err}");
                        self.terminate("camera-open-failed");
                    }
                },
                PipelineState::Recovering if self.reopens_without_frame >= MAX_REOPENS_WITHOUT_FRAME => {
                    error!(
                        "Camera reopened {} times without delivering a frame",
                        self.reopens_without_frame
                    );
                    self.terminate("camera-lost");
                }
                PipelineState::Recovering => match self.lease.reopen() {
                    Ok(()) => {
                        self.reopens_without_frame += 1;
                        info!("Camera #{} reinitialized", self.lease.device_index());
                        metrics::counter!("vision_camera_reinit_total", "outcome" => "ok")
                            .increment(1);
                        self.transition(PipelineState::Streaming);
                    }
                    Err(err) => {
                        error!("Camera reinitialization failed: {err}");
                        metrics::counter!("vision_camera_reinit_total", "outcome" => "failed")
                            .increment(1);
                        self.terminate("camera-lost");
                    }
                },
                PipelineState::CameraReady | PipelineState::Streaming => {
                    let frame = match self.lease.read_frame() {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!("Failed to read frame from camera: {err}");
                            if self.reopens_without_frame > 0 {
                                thread::sleep(self.backoff);
                            }
                            self.transition(PipelineState::Recovering);
                            continue;
                        }
                    };
                    self.reopens_without_frame = 0;
                    match self.process(frame) {
                        Ok(chunk) => {
                            self.transition(PipelineState::Streaming);
                            metrics::counter!("vision_frames_streamed_total").increment(1);
                            return Some(chunk);
                        }
                        Err(err) if err.is_fatal() => {
                            error!("{err}");
                            self.terminate("detector-contract");
                        }
                        Err(err) => {
                            warn!("Error processing frame: {err}");
                            metrics::counter!("vision_frame_errors_total").increment(1);
                            thread::sleep(self.backoff);
                        }
                    }
                }
                PipelineState::Terminated => return None,
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{ScriptedDetector, raw};
    use super::*;
    use crate::vision::camera::{
        CameraHub,
        testing::{Open, Read, ScriptedOpener},
    };
    use crate::vision::data::Detection;

    struct Harness {
        pipeline: FramePipeline,
        store: DetectionStore,
        opener: ScriptedOpener,
        shutdown: Arc<AtomicBool>,
        hub: Arc<CameraHub>,
    }

    fn harness(opener: ScriptedOpener, detector: ScriptedDetector, config: StreamConfig) -> Harness {
        let hub = Arc::new(CameraHub::new(Box::new(opener.clone()), 0));
        let store = DetectionStore::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let settings = StreamSettings {
            jpeg_quality: 80,
            backoff: Duration::from_millis(1),
        };
        let pipeline = FramePipeline::new(
            hub.try_lease().unwrap(),
            Arc::new(detector),
            store.clone(),
            config,
            settings,
            shutdown.clone(),
        );
        Harness {
            pipeline,
            store,
            opener,
            shutdown,
            hub,
        }
    }

    #[test]
    fn streams_multipart_chunks_and_publishes_detections() {
        let mut h = harness(
            ScriptedOpener::new(&[], &[]),
            ScriptedDetector::constant(vec![raw(4, 0.9)]),
            StreamConfig::default(),
        );
        assert_eq!(h.pipeline.state(), PipelineState::Uninitialized);

        let chunk = h.pipeline.next().unwrap();
        assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));
        assert!(chunk.ends_with(b"\xFF\xD9\r\n"));
        assert_eq!(h.pipeline.state(), PipelineState::Streaming);

        let batch = h.store.snapshot();
        assert_eq!(batch.frame_number, 1);
        assert_eq!(
            batch.detections,
            vec![Detection {
                label: "Weapons".into(),
                confidence: 0.9
            }]
        );
    }

    #[test]
    fn store_holds_exactly_the_latest_completed_frame() {
        let detector = ScriptedDetector::new(
            vec![
                Ok(vec![raw(0, 0.8), raw(1, 0.7)]),
                Ok(vec![raw(2, 0.6)]),
                Ok(vec![]),
            ],
            vec![],
        );
        let mut h = harness(ScriptedOpener::new(&[], &[]), detector, StreamConfig::default());

        h.pipeline.next().unwrap();
        let first = h.store.snapshot();
        assert_eq!(first.frame_number, 1);
        assert_eq!(first.detections.len(), 2);

        h.pipeline.next().unwrap();
        let second = h.store.snapshot();
        assert_eq!(second.frame_number, 2);
        assert_eq!(second.detections.len(), 1);
        assert_eq!(second.detections[0].label, "Intrusion");

        h.pipeline.next().unwrap();
        assert!(h.store.snapshot().detections.is_empty());
    }

    #[test]
    fn threshold_filters_published_detections() {
        let config = StreamConfig {
            confidence_threshold: 0.5,
            ..StreamConfig::default()
        };
        let mut h = harness(
            ScriptedOpener::new(&[], &[]),
            ScriptedDetector::constant(vec![raw(0, 0.49), raw(1, 0.5), raw(3, 0.95)]),
            config,
        );
        h.pipeline.next().unwrap();
        let batch = h.store.snapshot();
        assert_eq!(batch.detections.len(), 2);
        assert!(batch.detections.iter().all(|d| d.confidence >= 0.5));
    }

    #[test]
    fn label_detections_enforces_threshold_even_for_loose_detectors() {
        let labelled = label_detections(vec![raw(0, 0.2), raw(5, 0.7)], 0.5).unwrap();
        assert_eq!(labelled.len(), 1);
        assert_eq!(labelled[0].label, "Bags Theft");
    }

    #[test]
    fn read_failure_with_successful_reinit_keeps_streaming() {
        let opener = ScriptedOpener::new(&[], &[Read::Frame, Read::Fail, Read::Frame]);
        let mut h = harness(opener, ScriptedDetector::constant(vec![]), StreamConfig::default());

        assert!(h.pipeline.next().is_some());
        assert!(h.pipeline.next().is_some());
        assert_eq!(h.pipeline.state(), PipelineState::Streaming);
        assert_eq!(h.opener.open_calls(), 2);
        assert_eq!(h.opener.live_handles(), 1);
    }

    #[test]
    fn read_failure_with_failed_reinit_terminates() {
        let opener = ScriptedOpener::new(&[Open::Ok, Open::Fail], &[Read::Frame, Read::Fail]);
        let mut h = harness(opener, ScriptedDetector::constant(vec![]), StreamConfig::default());

        assert!(h.pipeline.next().is_some());
        assert!(h.pipeline.next().is_none());
        assert_eq!(h.pipeline.state(), PipelineState::Terminated);
        assert!(h.pipeline.next().is_none(), "terminated streams never restart");
        assert!(!h.hub.is_open());
    }

    #[test]
    fn failed_frames_back_off_and_leave_the_store_untouched() {
        let detector = ScriptedDetector::new(
            vec![Ok(vec![raw(1, 0.9)]), Err("inference exploded".into())],
            vec![raw(2, 0.8)],
        );
        let mut h = harness(ScriptedOpener::new(&[], &[]), detector, StreamConfig::default());

        h.pipeline.next().unwrap();
        assert_eq!(h.store.snapshot().detections[0].label, "Balaclava");

        h.pipeline.next().unwrap();
        let batch = h.store.snapshot();
        assert_eq!(batch.frame_number, 2);
        assert_eq!(batch.detections[0].label, "Intrusion");
        assert_eq!(h.pipeline.state(), PipelineState::Streaming);
    }

    #[test]
    fn persistent_read_failures_back_off_and_give_up() {
        let opener = ScriptedOpener::new(&[], &[Read::Fail; 12]);
        let mut h = harness(opener, ScriptedDetector::constant(vec![]), StreamConfig::default());

        assert!(h.pipeline.next().is_none());
        assert_eq!(h.pipeline.state(), PipelineState::Terminated);
        assert_eq!(
            h.opener.open_calls(),
            1 + MAX_REOPENS_WITHOUT_FRAME as usize,
            "initial open plus bounded reopens"
        );
    }

    #[test]
    fn a_good_frame_resets_the_reopen_budget() {
        let mut reads = vec![Read::Fail; MAX_REOPENS_WITHOUT_FRAME as usize - 1];
        reads.push(Read::Frame);
        reads.extend([Read::Fail, Read::Frame]);
        let opener = ScriptedOpener::new(&[], &reads);
        let mut h = harness(opener, ScriptedDetector::constant(vec![]), StreamConfig::default());

        assert!(h.pipeline.next().is_some());
        assert!(h.pipeline.next().is_some());
        assert_eq!(h.pipeline.state(), PipelineState::Streaming);
    }

    #[test]
    fn disconnected_client_ends_a_stream_that_only_fails() {
        let checks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = checks.clone();
        let mut h = harness(
            ScriptedOpener::new(&[], &[]),
            ScriptedDetector::failing("inference exploded"),
            StreamConfig::default(),
        );
        h.pipeline = h
            .pipeline
            .with_disconnect_check(move || seen.fetch_add(1, Ordering::SeqCst) >= 3);

        assert!(h.pipeline.next().is_none());
        assert_eq!(h.pipeline.state(), PipelineState::Terminated);
        assert!(checks.load(Ordering::SeqCst) >= 4);
        let hub = h.hub.clone();
        drop(h);
        assert!(hub.try_lease().is_some());
    }

    #[test]
    fn unknown_class_ids_terminate_the_stream() {
        let mut h = harness(
            ScriptedOpener::new(&[], &[]),
            ScriptedDetector::constant(vec![raw(7, 0.9)]),
            StreamConfig::default(),
        );
        assert!(h.pipeline.next().is_none());
        assert_eq!(h.pipeline.state(), PipelineState::Terminated);
        assert!(h.store.snapshot().detections.is_empty());
    }

    #[test]
    fn camera_that_cannot_open_terminates_immediately() {
        let mut h = harness(
            ScriptedOpener::new(&[Open::Fail], &[]),
            ScriptedDetector::constant(vec![]),
            StreamConfig::default(),
        );
        assert!(h.pipeline.next().is_none());
        assert_eq!(h.pipeline.state(), PipelineState::Terminated);
    }

    #[test]
    fn shutdown_terminates_from_any_state() {
        let mut h = harness(
            ScriptedOpener::new(&[], &[]),
            ScriptedDetector::constant(vec![]),
            StreamConfig::default(),
        );
        assert!(h.pipeline.next().is_some());
        h.shutdown.store(true, Ordering::SeqCst);
        assert!(h.pipeline.next().is_none());
        assert_eq!(h.pipeline.state(), PipelineState::Terminated);
    }

    #[test]
    fn dropping_the_pipeline_returns_the_lease() {
        let h = harness(
            ScriptedOpener::new(&[], &[]),
            ScriptedDetector::constant(vec![]),
            StreamConfig::default(),
        );
        assert!(h.hub.try_lease().is_none());
        let hub = h.hub.clone();
        drop(h);
        assert!(hub.try_lease().is_some());
    }
}
