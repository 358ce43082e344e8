//! OpenCV-backed camera capture.

use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{debug, info, warn};

use crate::types::{CaptureError, Frame};
use crate::{FrameSource, SourceOpener};

/// Opens local capture devices through OpenCV.
pub struct OpenCvOpener {
    capture_size: Option<(i32, i32)>,
}

impl OpenCvOpener {
    pub fn new(capture_size: Option<(i32, i32)>) -> Self {
        Self { capture_size }
    }
}

impl SourceOpener for OpenCvOpener {
    fn open(&self, device_index: i32) -> Result<Box<dyn FrameSource>, CaptureError> {
        let camera = OpenCvCamera::open(device_index, self.capture_size)?;
        Ok(Box::new(camera))
    }
}

/// Owned `VideoCapture` handle; released on drop.
pub struct OpenCvCamera {
    device_index: i32,
    capture: VideoCapture,
    scratch: Mat,
}

impl OpenCvCamera {
    pub fn open(device_index: i32, capture_size: Option<(i32, i32)>) -> Result<Self, CaptureError> {
        let mut capture = open_video_capture(device_index)?;
        if let Some(size) = capture_size {
            configure_camera(&mut capture, size);
        }
        info!("Camera initialized successfully at index {device_index}");
        Ok(Self {
            device_index,
            capture,
            scratch: Mat::default(),
        })
    }
}

impl FrameSource for OpenCvCamera {
    fn device_index(&self) -> i32 {
        self.device_index
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let read_error = |reason: String| CaptureError::Read {
            device: self.device_index,
            reason,
        };

        let grabbed = self
            .capture
            .read(&mut self.scratch)
            .map_err(|err| read_error(err.to_string()))?;
        if !grabbed {
            return Err(read_error("device returned no frame".into()));
        }

        let size = self
            .scratch
            .size()
            .map_err(|err| read_error(err.to_string()))?;
        if size.width <= 0 || size.height <= 0 {
            return Err(read_error("device returned an empty frame".into()));
        }
        if self.scratch.channels() != 3 {
            return Err(read_error(format!(
                "expected 3 channels, got {}",
                self.scratch.channels()
            )));
        }

        let data = self
            .scratch
            .data_bytes()
            .map_err(|err| read_error(err.to_string()))?
            .to_vec();
        Frame::from_bgr(size.width, size.height, data)
    }
}

impl Drop for OpenCvCamera {
    fn drop(&mut self) {
        match self.capture.release() {
            Ok(()) => info!("Camera #{} released", self.device_index),
            Err(err) => warn!("Failed to release camera #{}: {err}", self.device_index),
        }
    }
}

/// Attempt to open a camera by index, preferring V4L.
fn open_video_capture(index: i32) -> Result<VideoCapture, CaptureError> {
    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::new(index, backend) {
            Ok(cap) => {
                if cap
                    .is_opened()
                    .map_err(|e| CaptureError::Other(e.into()))?
                {
                    return Ok(cap);
                }
            }
            Err(err) => {
                debug!("failed to open device #{index} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open { device: index })
}

/// Apply the requested resolution and preferred pixel format.
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32)) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
}
