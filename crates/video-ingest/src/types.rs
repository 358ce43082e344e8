use anyhow::Error;
use chrono::Utc;
use thiserror::Error;

/// Raw BGR8 frame captured from a video source, stored row-major.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

impl Frame {
    /// Wrap an existing BGR8 buffer, checking it matches the given dimensions.
    pub fn from_bgr(width: i32, height: i32, data: Vec<u8>) -> Result<Self, CaptureError> {
        if width <= 0 || height <= 0 {
            return Err(CaptureError::Geometry {
                width,
                height,
                len: data.len(),
            });
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CaptureError::Geometry {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        })
    }

    /// Solid black frame.
    pub fn black(width: i32, height: i32) -> Result<Self, CaptureError> {
        let len = width.max(0) as usize * height.max(0) as usize * 3;
        Self::from_bgr(width, height, vec![0; len])
    }

    /// BGR triple at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: i32, y: i32) -> Option<[u8; 3]> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open camera device #{device}")]
    Open { device: i32 },
    #[error("failed to read frame from camera device #{device}: {reason}")]
    Read { device: i32, reason: String },
    #[error("frame buffer of {len} bytes does not describe a {width}x{height} BGR8 image")]
    Geometry { width: i32, height: i32, len: usize },
    #[error("{0} support was not compiled into this build")]
    Unsupported(&'static str),
    #[error(transparent)]
    Other(#[from] Error),
}
