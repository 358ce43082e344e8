//! Actix Web server exposing the dashboard, MJPEG stream, and detection APIs.
//!
//! The server runs on a dedicated thread with its own actix system. Each
//! `/video_feed` client gets a blocking pipeline thread that feeds encoded
//! parts into the response body through a small bounded channel.

use std::{
    net::TcpListener,
    sync::{Arc, atomic::AtomicBool},
    thread::JoinHandle,
};

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::{Method, header},
    middleware::DefaultHeaders,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use ml_core::Detector;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span, warn};

use crate::vision::{
    camera::CameraHub,
    config::{StreamConfig, StreamSettings, VideoFeedQuery},
    data::{DetectionStore, DetectionsResponse},
    encoding::STREAM_CONTENT_TYPE,
    pipeline::FramePipeline,
    telemetry,
};

/// Parts buffered between a pipeline thread and its HTTP response.
const STREAM_CHANNEL_DEPTH: usize = 2;

/// Shared state backing HTTP handlers.
#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) camera: Arc<CameraHub>,
    pub(crate) detector: Arc<dyn Detector>,
    pub(crate) store: DetectionStore,
    pub(crate) settings: StreamSettings,
    pub(crate) shutdown: Arc<AtomicBool>,
}

/// Handle for the HTTP server thread.
pub(crate) struct StreamServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamServer {
    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Bind `host:port` and spawn the server thread.
///
/// Binding happens on the caller's thread so an unusable address fails
/// startup instead of surfacing later in the server thread.
pub(crate) fn spawn_server(state: ServerState, host: &str, port: u16) -> Result<StreamServer> {
    let listener = TcpListener::bind((host, port))
        .with_context(|| format!("Failed to bind HTTP server to {host}:{port}"))?;
    let local = listener
        .local_addr()
        .context("Failed to read bound address")?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let handle = telemetry::spawn_thread("vision-http-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    .wrap(cors_headers())
                    .configure(configure)
            })
            .disable_signals()
            .shutdown_timeout(5)
            .listen(listener)?
            .run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn HTTP server thread")?;

    info!("Serving on http://{local}");
    Ok(StreamServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Register every route; shared by the real server and tests.
pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/video_feed", web::get().to(video_feed_handler))
        .route("/detections", web::get().to(detections_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .default_service(web::to(fallback_handler));
}

pub(crate) fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .add((header::ACCESS_CONTROL_ALLOW_METHODS, "GET,POST,OPTIONS"))
        .add((header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type,Authorization"))
}

/// Serve the dashboard HTML.
async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::dashboard::INDEX_HTML)
}

/// Stream annotated frames as `multipart/x-mixed-replace`.
async fn video_feed_handler(
    query: web::Query<VideoFeedQuery>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    let config = match StreamConfig::try_from(query.into_inner()) {
        Ok(config) => config,
        Err(err) => return HttpResponse::BadRequest().body(err.to_string()),
    };

    let Some(lease) = state.camera.try_lease() else {
        warn!("Rejecting /video_feed: camera is already streaming to another client");
        metrics::counter!("vision_stream_sessions_total", "outcome" => "busy").increment(1);
        return HttpResponse::ServiceUnavailable()
            .body("camera is busy with another stream");
    };

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(STREAM_CHANNEL_DEPTH);
    let watch = tx.clone();
    let pipeline = FramePipeline::new(
        lease,
        state.detector.clone(),
        state.store.clone(),
        config,
        state.settings,
        state.shutdown.clone(),
    )
    .with_disconnect_check(move || watch.is_closed());

    let worker = telemetry::spawn_thread("vision-stream", move || {
        let span = info_span!(
            "stream",
            boxes = config.show_boxes,
            labels = config.show_labels,
            threshold = config.confidence_threshold
        );
        let _guard = span.enter();
        info!("Stream started");
        for chunk in pipeline {
            if tx.blocking_send(chunk).is_err() {
                debug!("Client disconnected");
                metrics::counter!("vision_stream_sessions_total", "outcome" => "client-closed")
                    .increment(1);
                break;
            }
        }
    });
    if let Err(err) = worker {
        error!("Failed to spawn stream worker: {err}");
        return HttpResponse::InternalServerError().body("failed to start stream");
    }

    let body = stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(chunk));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .content_type(STREAM_CONTENT_TYPE)
        .streaming(body)
}

/// Return the latest detection batch as JSON.
async fn detections_handler(state: web::Data<ServerState>) -> HttpResponse {
    let batch = state.store.snapshot();
    HttpResponse::Ok().json(DetectionsResponse::from_batch(&batch))
}

/// Prometheus text exposition.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

/// Answer CORS preflight on any path; everything else is unknown.
async fn fallback_handler(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::NotFound().finish()
    }
}
