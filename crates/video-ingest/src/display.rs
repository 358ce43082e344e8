//! Native preview window backed by OpenCV highgui.

use opencv::{
    core::{CV_8UC3, Mat, Scalar},
    highgui,
    prelude::*,
};
use tracing::{info, warn};

use crate::types::{CaptureError, Frame};

/// A named highgui window, destroyed when dropped.
pub struct PreviewWindow {
    name: String,
    canvas: Mat,
}

impl PreviewWindow {
    pub fn open(name: &str) -> Result<Self, CaptureError> {
        highgui::named_window(name, highgui::WINDOW_AUTOSIZE)
            .map_err(|e| CaptureError::Other(e.into()))?;
        Ok(Self {
            name: name.to_string(),
            canvas: Mat::default(),
        })
    }

    /// Copy `frame` into the window's canvas and display it.
    pub fn show(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        let size = self
            .canvas
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if size.width != frame.width || size.height != frame.height {
            self.canvas = Mat::new_rows_cols_with_default(
                frame.height,
                frame.width,
                CV_8UC3,
                Scalar::all(0.0),
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
        }
        self.canvas
            .data_bytes_mut()
            .map_err(|e| CaptureError::Other(e.into()))?
            .copy_from_slice(&frame.data);
        highgui::imshow(&self.name, &self.canvas).map_err(|e| CaptureError::Other(e.into()))
    }

    /// Pump window events for `delay_ms` and return the pressed key, if any.
    pub fn poll_key(&self, delay_ms: i32) -> Result<Option<char>, CaptureError> {
        let key = highgui::wait_key(delay_ms).map_err(|e| CaptureError::Other(e.into()))?;
        if key < 0 {
            return Ok(None);
        }
        Ok(char::from_u32((key & 0xFF) as u32))
    }
}

impl Drop for PreviewWindow {
    fn drop(&mut self) {
        match highgui::destroy_window(&self.name) {
            Ok(()) => info!("Preview window closed"),
            Err(err) => warn!("Failed to close preview window: {err}"),
        }
    }
}
