use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::vision::{self, PreviewArgs, PreviewConfig, ServeArgs, ServeConfig, TelemetryOptions};

/// Live webcam object detection.
#[derive(Debug, Parser)]
#[command(name = "detection-stream", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Write a Chrome trace JSON file capturing pipeline spans.
    #[arg(long = "chrome-trace", value_name = "PATH", global = true)]
    pub chrome_trace: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the annotated MJPEG stream, detections API and dashboard.
    Serve(ServeArgs),
    /// Show annotated frames in a desktop window.
    Preview(PreviewArgs),
}

impl Cli {
    pub fn telemetry_options(&self) -> TelemetryOptions {
        let verbose = match &self.command {
            Command::Serve(args) => args.verbose,
            Command::Preview(args) => args.verbose,
        };
        TelemetryOptions {
            chrome_trace_path: self.chrome_trace.clone(),
            verbose,
        }
    }
}

pub fn handle_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => vision::serve(ServeConfig::try_from(args)?),
        Command::Preview(args) => vision::preview(PreviewConfig::try_from(args)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults_match_the_documented_interface() {
        let cli = Cli::try_parse_from(["detection-stream", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = ServeConfig::try_from(args).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.model_path, PathBuf::from("best.pt"));
        assert_eq!(config.stream.jpeg_quality, 95);
    }

    #[test]
    fn verbose_flag_reaches_telemetry() {
        let cli = Cli::try_parse_from([
            "detection-stream",
            "--chrome-trace",
            "trace.json",
            "preview",
            "--verbose",
        ])
        .unwrap();
        let opts = cli.telemetry_options();
        assert!(opts.verbose);
        assert_eq!(opts.chrome_trace_path, Some(PathBuf::from("trace.json")));
    }

    #[test]
    fn rejects_unknown_subcommands() {
        assert!(Cli::try_parse_from(["detection-stream", "train"]).is_err());
    }
}
