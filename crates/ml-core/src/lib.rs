//! Detector contract shared by the streaming server and the desktop preview.
//!
//! The detector itself is opaque: it receives a frame plus a confidence
//! threshold and hands back boxes with class ids. Class ids resolve through
//! the fixed label table in [`labels`].

pub mod detector;
pub mod labels;
#[cfg(feature = "with-tch")]
pub mod torchscript;

pub use detector::{BoundingBox, Detector, DetectorError, RawDetection, load_detector};
pub use labels::{CLASS_NAMES, UnknownClassId, class_name};

#[cfg(feature = "with-tch")]
pub use tch;
