//! Live detection pipeline: capture frames, run inference, annotate and
//! stream them over HTTP (or show them in a desktop window).
//!
//! The module is split into focused submodules:
//! - `config`: CLI and query-string configuration.
//! - `camera`: Shared camera handle and the per-stream lease.
//! - `pipeline`: Per-client read → detect → annotate → encode iterator.
//! - `annotation`: Box and label drawing for stream and preview overlays.
//! - `encoding`: JPEG encoding and multipart framing.
//! - `data`: Detection batches and the store polled by `/detections`.
//! - `server`: Actix Web endpoints.
//! - `preview`: Desktop preview loop.
//! - `runtime`: `serve` / `preview` entry points.
//! - `telemetry`: Tracing subscriber and Prometheus recorder.

/// Re-export settings so callers can configure runs without reaching into
/// submodules.
pub use config::{PreviewArgs, PreviewConfig, ServeArgs, ServeConfig, TelemetryOptions};
pub use runtime::{preview, serve};

mod annotation;
mod camera;
mod config;
mod data;
mod encoding;
mod pipeline;
#[cfg_attr(not(feature = "opencv"), allow(dead_code))]
mod preview;
mod runtime;
mod server;
pub(crate) mod telemetry;
