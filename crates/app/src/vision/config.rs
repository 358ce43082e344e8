//! Configuration parsing for the server, preview and per-stream options.
//!
//! CLI arguments are validated once into `ServeConfig` / `PreviewConfig`;
//! query strings on `/video_feed` become a `StreamConfig` that is fixed for
//! the lifetime of that stream.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, anyhow, bail};
use clap::Args;
use serde::Deserialize;
use thiserror::Error;
use video_ingest::SourceSpec;

pub(crate) const DEFAULT_CONFIDENCE_PERCENT: f32 = 30.0;
const DEFAULT_JPEG_QUALITY: u8 = 95;
const DEFAULT_BACKOFF_MS: u64 = 1_000;

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Default the log filter to `debug` instead of `info`.
    pub verbose: bool,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Camera index, `/dev/videoN` path, or `synthetic`.
    #[arg(long = "source", value_name = "SOURCE", default_value = "0")]
    pub source: String,
    /// TorchScript weights loaded once at startup.
    #[arg(long = "model", value_name = "PATH", default_value = "best.pt")]
    pub model_path: PathBuf,
    /// Address to bind the HTTP server to.
    #[arg(long = "host", default_value = "0.0.0.0")]
    pub host: String,
    /// Port to bind the HTTP server to.
    #[arg(long = "port", default_value_t = 5000)]
    pub port: u16,
    /// Requested capture width in pixels.
    #[arg(long = "width", value_name = "PX", requires = "height")]
    pub width: Option<i32>,
    /// Requested capture height in pixels.
    #[arg(long = "height", value_name = "PX", requires = "width")]
    pub height: Option<i32>,
    /// JPEG quality used by the stream encoder (1-100).
    #[arg(long = "jpeg-quality", value_name = "1-100", default_value_t = DEFAULT_JPEG_QUALITY)]
    pub jpeg_quality: u8,
    /// Pause after a frame fails to process, in milliseconds.
    #[arg(long = "backoff-ms", value_name = "MS", default_value_t = DEFAULT_BACKOFF_MS)]
    pub backoff_ms: u64,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Enable debug logging (per-frame detections, state transitions).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

/// CLI arguments accepted by the `preview` subcommand.
#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Camera index, `/dev/videoN` path, or `synthetic`.
    #[arg(long = "source", value_name = "SOURCE", default_value = "0")]
    pub source: String,
    /// TorchScript weights.
    #[arg(long = "model", value_name = "PATH", default_value = "best.pt")]
    pub model_path: PathBuf,
    /// Minimum confidence in percent (0-100).
    #[arg(long = "confidence", value_name = "0-100", default_value_t = DEFAULT_CONFIDENCE_PERCENT)]
    pub confidence: f32,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Enable debug logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

/// Encoder and recovery settings shared by every stream the server opens.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamSettings {
    pub jpeg_quality: u8,
    pub backoff: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub source: SourceSpec,
    pub model_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub capture_size: Option<(i32, i32)>,
    pub use_cpu: bool,
    pub stream: StreamSettings,
}

impl TryFrom<ServeArgs> for ServeConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self> {
        let source = parse_source(&args.source)?;
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        let capture_size = parse_capture_size(args.width, args.height)?;
        Ok(Self {
            source,
            model_path: args.model_path,
            host: args.host,
            port: args.port,
            capture_size,
            use_cpu: args.use_cpu,
            stream: StreamSettings {
                jpeg_quality: args.jpeg_quality,
                backoff: Duration::from_millis(args.backoff_ms),
            },
        })
    }
}

#[derive(Clone, Debug)]
pub struct PreviewConfig {
    pub source: SourceSpec,
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub use_cpu: bool,
}

impl TryFrom<PreviewArgs> for PreviewConfig {
    type Error = anyhow::Error;

    fn try_from(args: PreviewArgs) -> Result<Self> {
        let source = parse_source(&args.source)?;
        let confidence_threshold = percent_to_threshold(args.confidence)
            .map_err(|_| anyhow!("--confidence must be between 0 and 100"))?;
        Ok(Self {
            source,
            model_path: args.model_path,
            confidence_threshold,
            use_cpu: args.use_cpu,
        })
    }
}

fn parse_source(value: &str) -> Result<SourceSpec> {
    SourceSpec::parse(value).ok_or_else(|| {
        anyhow!("Unrecognised source {value:?}. Use a camera index, /dev/videoN, or `synthetic`.")
    })
}

fn parse_capture_size(width: Option<i32>, height: Option<i32>) -> Result<Option<(i32, i32)>> {
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok(Some((w, h))),
        (Some(_), Some(_)) => bail!("--width and --height must be positive integers"),
        (None, None) => Ok(None),
        _ => bail!("--width and --height must be given together"),
    }
}

/// Overlay and filtering options for one `/video_feed` stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamConfig {
    pub show_boxes: bool,
    pub show_labels: bool,
    /// Minimum confidence in `[0, 1]`.
    pub confidence_threshold: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            show_boxes: true,
            show_labels: true,
            confidence_threshold: DEFAULT_CONFIDENCE_PERCENT / 100.0,
        }
    }
}

/// Raw `/video_feed` query string.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct VideoFeedQuery {
    pub(crate) show_boxes: Option<String>,
    pub(crate) show_labels: Option<String>,
    pub(crate) confidence: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub(crate) enum QueryError {
    #[error("confidence must be a number between 0 and 100, got {0:?}")]
    Confidence(String),
}

impl TryFrom<VideoFeedQuery> for StreamConfig {
    type Error = QueryError;

    fn try_from(query: VideoFeedQuery) -> Result<Self, QueryError> {
        let confidence_threshold = match query.confidence {
            Some(raw) => raw
                .trim()
                .parse::<f32>()
                .ok()
                .and_then(|value| percent_to_threshold(value).ok())
                .ok_or(QueryError::Confidence(raw))?,
            None => DEFAULT_CONFIDENCE_PERCENT / 100.0,
        };
        Ok(Self {
            show_boxes: query.show_boxes.as_deref().is_none_or(flag_enabled),
            show_labels: query.show_labels.as_deref().is_none_or(flag_enabled),
            confidence_threshold,
        })
    }
}

/// Flags are on only when spelled `true`, in any case.
fn flag_enabled(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn percent_to_threshold(percent: f32) -> Result<f32, ()> {
    if percent.is_finite() && (0.0..=100.0).contains(&percent) {
        Ok(percent / 100.0)
    } else {
        Err(())
    }
}
