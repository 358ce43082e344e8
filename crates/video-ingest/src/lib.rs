//! Camera acquisition for the detection stream.
//!
//! A [`SourceOpener`] knows how to open a device index and hand back a
//! [`FrameSource`] that owns the device handle. Dropping the source releases
//! the device, so every exit path closes the camera.

#[cfg(feature = "opencv")]
mod camera;
#[cfg(feature = "opencv")]
mod display;
mod synthetic;
mod types;

#[cfg(feature = "opencv")]
pub use camera::{OpenCvCamera, OpenCvOpener};
#[cfg(feature = "opencv")]
pub use display::PreviewWindow;
pub use synthetic::{SyntheticCamera, SyntheticOpener};
pub use types::{CaptureError, Frame, FrameFormat};

/// An open camera handle producing frames.
pub trait FrameSource: Send {
    /// Index the handle was opened with.
    fn device_index(&self) -> i32;

    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Opens camera handles by device index.
pub trait SourceOpener: Send + Sync {
    fn open(&self, device_index: i32) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Where frames come from, as written on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local capture device by index.
    Device(i32),
    /// Generated test pattern.
    Synthetic,
}

impl SourceSpec {
    /// Parse `0`, `/dev/video0` or `synthetic`.
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("synthetic") {
            return Some(SourceSpec::Synthetic);
        }
        parse_device_index(value).map(SourceSpec::Device)
    }

    /// Device index handed to the opener; synthetic sources use 0.
    pub fn device_index(self) -> i32 {
        match self {
            SourceSpec::Device(index) => index,
            SourceSpec::Synthetic => 0,
        }
    }
}

/// Build the opener for `spec`, with an optional capture resolution hint.
pub fn opener_for(
    spec: SourceSpec,
    capture_size: Option<(i32, i32)>,
) -> Result<Box<dyn SourceOpener>, CaptureError> {
    match spec {
        SourceSpec::Synthetic => {
            let (width, height) = capture_size.unwrap_or((640, 480));
            Ok(Box::new(SyntheticOpener::new(width, height)))
        }
        #[cfg(feature = "opencv")]
        SourceSpec::Device(_) => Ok(Box::new(OpenCvOpener::new(capture_size))),
        #[cfg(not(feature = "opencv"))]
        SourceSpec::Device(_) => {
            let _ = capture_size;
            Err(CaptureError::Unsupported("OpenCV camera"))
        }
    }
}

/// Parse a `/dev/videoX` style URI or bare index and return the index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return (index >= 0).then_some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    stripped.parse::<i32>().ok()
}
