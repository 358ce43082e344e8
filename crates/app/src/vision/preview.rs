//! Desktop preview loop: detect, overlay and show frames in a native window.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use anyhow::{Context, Result};
use ml_core::Detector;
use tracing::{error, warn};
use video_ingest::{Frame, FrameSource};

use crate::vision::{annotation::annotate_preview, pipeline::label_detections};

pub(crate) const WINDOW_TITLE: &str = "Surveillance System";
const QUIT_KEY: char = 'q';
const KEY_POLL_MS: i32 = 1;

/// Where preview frames go and key presses come from.
pub(crate) trait PreviewSink {
    fn show(&mut self, frame: &Frame) -> Result<()>;
    /// Wait up to `delay_ms` for a key press.
    fn poll_key(&mut self, delay_ms: i32) -> Result<Option<char>>;
}

#[cfg(feature = "opencv")]
impl PreviewSink for video_ingest::PreviewWindow {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        Ok(video_ingest::PreviewWindow::show(self, frame)?)
    }

    fn poll_key(&mut self, delay_ms: i32) -> Result<Option<char>> {
        Ok(video_ingest::PreviewWindow::poll_key(self, delay_ms)?)
    }
}

/// Why the preview loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PreviewExit {
    Quit,
    SourceFailed,
    Shutdown,
}

/// Average frames per second since the first frame.
#[derive(Debug, Default)]
pub(crate) struct FpsCounter {
    frames: u64,
    started: Option<Instant>,
}

impl FpsCounter {
    pub(crate) fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    pub(crate) fn tick_at(&mut self, now: Instant) -> f32 {
        let started = *self.started.get_or_insert(now);
        self.frames += 1;
        let elapsed = now.duration_since(started).as_secs_f32();
        if elapsed > 0.0 {
            self.frames as f32 / elapsed
        } else {
            0.0
        }
    }
}

pub(crate) fn run_preview_loop(
    source: &mut dyn FrameSource,
    detector: &dyn Detector,
    sink: &mut dyn PreviewSink,
    confidence_threshold: f32,
    shutdown: &AtomicBool,
) -> Result<PreviewExit> {
    let mut fps = FpsCounter::default();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(PreviewExit::Shutdown);
        }

        let mut frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                error!("Failed to grab frame: {err}");
                return Ok(PreviewExit::SourceFailed);
            }
        };

        let labelled = match detector.detect(&frame, confidence_threshold) {
            Ok(raw) => label_detections(raw, confidence_threshold)
                .context("detector produced an unknown class id")?,
            Err(err) => {
                warn!("Detection failed: {err:#}");
                Vec::new()
            }
        };

        annotate_preview(&mut frame, &labelled, fps.tick());
        sink.show(&frame)?;
        if sink.poll_key(KEY_POLL_MS)? == Some(QUIT_KEY) {
            return Ok(PreviewExit::Quit);
        }
    }
}
