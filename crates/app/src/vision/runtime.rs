//! Process entry points for the `serve` and `preview` subcommands.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use ml_core::{Detector, load_detector};
use tracing::{info, info_span, warn};
use video_ingest::opener_for;

use crate::vision::{
    camera::{CameraHub, ReleaseOnDrop},
    config::{PreviewConfig, ServeConfig},
    data::DetectionStore,
    server::{ServerState, spawn_server},
    telemetry,
};

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Flag flipped by SIGINT/SIGTERM.
fn install_shutdown_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        handler_shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to install Ctrl+C handler: {err}");
    }
    shutdown
}

fn load_model(config_path: &std::path::Path, use_cpu: bool) -> Result<Arc<dyn Detector>> {
    let detector = load_detector(config_path, use_cpu)
        .with_context(|| format!("Error loading model {}", config_path.display()))?;
    info!("Model loaded: {}", detector.describe());
    Ok(Arc::from(detector))
}

/// Load the model, open the camera and serve until a shutdown signal.
pub fn serve(config: ServeConfig) -> Result<()> {
    let span = info_span!("vision.serve", host = %config.host, port = config.port);
    let _enter = span.enter();

    let shutdown = install_shutdown_handler();
    telemetry::init_metrics_recorder()?;

    let detector = load_model(&config.model_path, config.use_cpu)?;

    let device_index = config.source.device_index();
    let opener = opener_for(config.source, config.capture_size)
        .context("Camera source is not available in this build")?;
    let camera = Arc::new(CameraHub::new(opener, device_index));
    let _release = ReleaseOnDrop(camera.clone());
    camera
        .open()
        .with_context(|| format!("Error initializing camera #{device_index}"))?;
    info!("Camera initialized successfully at index {device_index}");

    let state = ServerState {
        camera,
        detector,
        store: DetectionStore::default(),
        settings: config.stream,
        shutdown: shutdown.clone(),
    };
    let server = spawn_server(state, &config.host, config.port)?;
    info!("Press Ctrl+C to stop");

    while !shutdown.load(Ordering::SeqCst) && server.is_running() {
        thread::sleep(SHUTDOWN_POLL);
    }
    if !shutdown.swap(true, Ordering::SeqCst) {
        warn!("HTTP server exited unexpectedly");
    }
    info!("Shutting down");
    server.stop();
    Ok(())
}

/// Show annotated frames in a desktop window until `q`, a camera failure or a
/// shutdown signal.
#[cfg(feature = "opencv")]
pub fn preview(config: PreviewConfig) -> Result<()> {
    use video_ingest::PreviewWindow;

    use crate::vision::preview::{WINDOW_TITLE, run_preview_loop};

    let span = info_span!("vision.preview");
    let _enter = span.enter();

    let shutdown = install_shutdown_handler();
    let detector = load_model(&config.model_path, config.use_cpu)?;

    let device_index = config.source.device_index();
    let opener = opener_for(config.source, None)
        .context("Camera source is not available in this build")?;
    let mut source = opener
        .open(device_index)
        .with_context(|| format!("Error initializing camera #{device_index}"))?;
    let mut window = PreviewWindow::open(WINDOW_TITLE).context("Failed to open preview window")?;

    let exit = run_preview_loop(
        source.as_mut(),
        detector.as_ref(),
        &mut window,
        config.confidence_threshold,
        &shutdown,
    )?;
    info!("Preview stopped: {exit:?}");
    Ok(())
}

#[cfg(not(feature = "opencv"))]
pub fn preview(config: PreviewConfig) -> Result<()> {
    let _ = config;
    anyhow::bail!("desktop preview requires a build with the `opencv` feature")
}
