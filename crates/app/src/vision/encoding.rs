//! JPEG encoding and multipart framing for the MJPEG stream.

use image::{
    ImageError, RgbImage,
    codecs::jpeg::JpegEncoder,
    error::{ParameterError, ParameterErrorKind},
};
use video_ingest::Frame;

/// Content type of `/video_feed`; parts are delimited by `--frame`.
pub(crate) const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

#[derive(Clone, Copy, Debug)]
pub(crate) struct StreamEncoder {
    quality: u8,
}

impl StreamEncoder {
    pub(crate) fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// JPEG-compress a BGR frame.
    pub(crate) fn encode(&self, frame: &Frame) -> Result<Vec<u8>, ImageError> {
        let rgb = RgbImage::from_raw(frame.width as u32, frame.height as u32, bgr_to_rgb(&frame.data))
            .ok_or_else(|| {
                ImageError::Parameter(ParameterError::from_kind(
                    ParameterErrorKind::DimensionMismatch,
                ))
            })?;
        let mut buffer = Vec::with_capacity(rgb.len() / 8);
        JpegEncoder::new_with_quality(&mut buffer, self.quality).encode_image(&rgb)?;
        Ok(buffer)
    }
}

/// Frame one JPEG as a multipart part.
pub(crate) fn wrap(jpeg: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    payload.extend_from_slice(PART_HEADER);
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(PART_TRAILER);
    payload
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
    }
    output
}
