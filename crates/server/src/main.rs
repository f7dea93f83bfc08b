use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::{get, post}, Json, Router};
use dotenvy::dotenv;
use homedash_core::{parse_cameras, paths, CameraDescriptor, CameraEvent};
use homedash_stream::{CameraRegistry, StreamConfig};
use prometheus::{Encoder, IntCounter, IntGauge, IntGaugeVec, TextEncoder};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cameras;
mod models;
mod services;

use models::*;
use services::RecordingService;

#[derive(Clone)]
pub struct AppState {
    pub cameras: Arc<CameraRegistry>,
    pub metrics: Arc<Metrics>,
    pub db: SqlitePool,
    pub recordings: RecordingService,
}

pub struct Metrics {
    pub mjpeg_clients: IntGauge,
    pub ws_clients: IntGauge,
    pub recordings_saved_total: IntCounter,
    pub recordings_failed_total: IntCounter,
    pub frames_produced: IntGaugeVec, // label: camera_id
    pub frames_dropped: IntGaugeVec,  // label: camera_id
    pub producer_running: IntGaugeVec, // label: camera_id
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let mjpeg_clients = IntGauge::new("homedash_mjpeg_clients", "Number of connected MJPEG stream clients").unwrap();
        let ws_clients = IntGauge::new("homedash_ws_clients", "Number of connected WebSocket clients").unwrap();
        let recordings_saved_total = IntCounter::new("homedash_recordings_saved_total", "Recordings transcoded to MP4").unwrap();
        let recordings_failed_total = IntCounter::new("homedash_recordings_failed_total", "Recordings whose transcode failed").unwrap();
        let frames_produced = IntGaugeVec::new(
            prometheus::Opts::new("homedash_camera_frames_produced", "Frames published since startup"),
            &["camera_id"],
        ).unwrap();
        let frames_dropped = IntGaugeVec::new(
            prometheus::Opts::new("homedash_camera_frames_dropped", "Frames dropped on source or decode errors since startup"),
            &["camera_id"],
        ).unwrap();
        let producer_running = IntGaugeVec::new(
            prometheus::Opts::new("homedash_camera_producer_running", "Producer task state (1 running, 0 otherwise)"),
            &["camera_id"],
        ).unwrap();

        let registry = prometheus::default_registry();
        let _ = registry.register(Box::new(mjpeg_clients.clone()));
        let _ = registry.register(Box::new(ws_clients.clone()));
        let _ = registry.register(Box::new(recordings_saved_total.clone()));
        let _ = registry.register(Box::new(recordings_failed_total.clone()));
        let _ = registry.register(Box::new(frames_produced.clone()));
        let _ = registry.register(Box::new(frames_dropped.clone()));
        let _ = registry.register(Box::new(producer_running.clone()));

        Arc::new(Self {
            mjpeg_clients,
            ws_clients,
            recordings_saved_total,
            recordings_failed_total,
            frames_produced,
            frames_dropped,
            producer_running,
        })
    }

    /// Copy per-camera counters into the gauges right before a scrape.
    fn refresh(&self, cameras: &CameraRegistry) {
        for camera in cameras.cameras() {
            let id = camera.id();
            self.frames_produced.with_label_values(&[id]).set(camera.frames_produced() as i64);
            self.frames_dropped.with_label_values(&[id]).set(camera.frames_dropped() as i64);
            self.producer_running.with_label_values(&[id]).set(camera.is_started() as i64);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let stream_cfg = StreamConfig::from_env();
    let descriptors = load_cameras()?;
    tracing::info!(
        cameras = descriptors.len(),
        videos_dir = %stream_cfg.videos_dir.display(),
        max_frames = stream_cfg.max_recording_frames,
        "Configuring camera pipeline"
    );
    let videos_dir = stream_cfg.videos_dir.clone();
    if let Err(e) = tokio::fs::create_dir_all(&videos_dir).await {
        tracing::warn!(error = %e, path = %videos_dir.display(), "Failed to create videos directory");
    }

    let registry = Arc::new(CameraRegistry::new(descriptors, stream_cfg));
    // Subscribe before any producer can emit
    let events = registry.events();

    let metrics = Metrics::new();
    let db = init_db().await.context("failed to init db")?;
    let recordings = RecordingService::new(db.clone());
    let state = AppState {
        cameras: registry.clone(),
        metrics: metrics.clone(),
        db: db.clone(),
        recordings: recordings.clone(),
    };

    if env_flag("HOMEDASH_CAMERAS_EAGER") {
        info!("Starting all camera producers eagerly");
        registry.start_all();
    }

    let app = router(state, &videos_dir);

    let addr: SocketAddr = std::env::var("HOMEDASH_HTTP_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .context("Invalid HOMEDASH_HTTP_ADDR")?;

    info!(%addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind HTTP listener")?;
    // Background consumer for camera events -> metrics + persistence
    let consumer = tokio::spawn(recording_consumer_loop(events, recordings, metrics));
    serve(listener, app, registry.clone(), shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped; shutting down cameras");
    registry.shutdown().await;
    // let the consumer persist outcomes of recordings flushed during shutdown
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    consumer.abort();
    Ok(())
}

/// Serve until `signal` resolves. Camera streams and event sockets are told
/// to end first, otherwise graceful shutdown would wait on them forever.
async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    cameras: Arc<CameraRegistry>,
    signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("Shutdown requested; closing camera streams");
            cameras.signal_shutdown();
        })
        .await
}

pub fn router(state: AppState, videos_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        // Camera pages and control
        .route("/camera/:camera_id", get(cameras::camera_page))
        .route("/camera/:camera_id/stream", get(cameras::camera_stream))
        .route("/camera/:camera_id/snapshot", get(cameras::camera_snapshot))
        .route("/camera/:camera_id/start_recording", post(cameras::start_recording))
        .route("/camera/:camera_id/stop_recording", post(cameras::stop_recording))
        .route("/camera/:camera_id/toggle_landmarks", post(cameras::toggle_landmarks))
        .route("/camera/:camera_id/recording_status", get(cameras::recording_status))
        // Read APIs
        .route("/api/cameras", get(cameras::api_list_cameras))
        .route("/api/recordings", get(api_list_recordings))
        // WebSocket endpoints
        .route("/ws/cameras", get(ws_cameras))
        // Saved videos
        .nest_service(paths::VIDEOS_ROOT, ServeDir::new(videos_dir))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,axum=info,hyper=info,reqwest=warn"))
        .unwrap();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Cameras from `HOMEDASH_CONFIG` (default `config.toml`). A missing file
/// means no cameras; a malformed one is a startup error.
fn load_cameras() -> anyhow::Result<Vec<CameraDescriptor>> {
    let path = PathBuf::from(std::env::var("HOMEDASH_CONFIG").unwrap_or_else(|_| "config.toml".to_string()));
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Camera config not found; starting without cameras");
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let cameras = parse_cameras(&raw).with_context(|| format!("invalid camera config {}", path.display()))?;
    for camera in &cameras {
        tracing::info!(camera_id = %camera.id, kind = %camera.kind, url = %camera.source_url(), "Camera configured");
    }
    Ok(cameras)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let mut items = String::new();
    for camera in state.cameras.cameras() {
        let d = camera.descriptor();
        items.push_str(&format!(
            "<li><a href=\"{}\">{}</a> <small>({})</small></li>\n",
            paths::camera_page(&d.id),
            cameras::escape_html(d.display_name()),
            d.kind
        ));
    }
    if items.is_empty() {
        items.push_str("<li>No cameras configured</li>\n");
    }
    Html(format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>homedash</title></head>\n<body><h1>Cameras</h1>\n<ul>\n{}</ul>\n</body></html>\n",
        items
    ))
}

async fn healthz() -> &'static str { "ok" }

async fn readyz(State(state): State<AppState>) -> StatusCode {
    // DB must be reachable
    let db_ok = sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&state.db).await.is_ok();
    if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    state.metrics.refresh(&state.cameras);
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        tracing::error!(?e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }
    ([(CONTENT_TYPE, encoder.format_type().to_string())], buf).into_response()
}

async fn api_list_recordings(State(state): State<AppState>, Query(q): Query<RecordingListQuery>) -> Response {
    match state.recordings.list(q.camera_id.as_deref(), q.limit).await {
        Ok(recordings) => {
            let views: Vec<RecordingView> = recordings.into_iter().map(RecordingView::from).collect();
            Json(views).into_response()
        }
        Err(e) => {
            tracing::error!(?e, "Failed to list recordings");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list recordings").into_response()
        }
    }
}

async fn ws_cameras(
    State(state): State<AppState>,
    Query(q): Query<EventStreamQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| camera_events_ws_loop(state, socket, q.camera_id))
}

/// Forwards camera events as JSON, optionally only those of one camera.
async fn camera_events_ws_loop(state: AppState, mut socket: WebSocket, camera_id: Option<String>) {
    use tokio::select;

    // Count WS client
    state.metrics.ws_clients.inc();
    tracing::info!("Camera events WebSocket client connected");

    let mut rx = state.cameras.events();
    let stopping = homedash_stream::wait_for_shutdown(state.cameras.shutdown_signal());
    tokio::pin!(stopping);

    loop {
        select! {
            _ = &mut stopping => {
                tracing::info!("Closing camera events WebSocket for shutdown");
                break;
            }
            ws_msg = socket.recv() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
                            if parsed.get("type").and_then(|v| v.as_str()) == Some("ping") {
                                let pong = serde_json::json!({"type": "pong"});
                                if socket.send(Message::Text(pong.to_string())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Camera events WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(?e, "Camera events WebSocket error reading message");
                        break;
                    }
                    _ => {}
                }
            }
            evt = rx.recv() => {
                let evt = match evt {
                    Ok(evt) => evt,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Camera events WebSocket lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if camera_id.as_deref().is_some_and(|id| id != evt.camera_id()) {
                    continue;
                }
                let msg = match serde_json::to_string(&evt) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(?e, "Failed to serialize camera event");
                        continue;
                    }
                };
                if socket.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = socket.close().await;
    state.metrics.ws_clients.dec();
}

/// Persists encoder outcomes and keeps the recording counters current.
async fn recording_consumer_loop(
    mut rx: broadcast::Receiver<CameraEvent>,
    recordings: RecordingService,
    metrics: Arc<Metrics>,
) {
    loop {
        let evt = match rx.recv().await {
            Ok(evt) => evt,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Recording consumer lagged; some outcomes were not persisted");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let new = match evt {
            CameraEvent::RecordingSaved { camera_id, filename, frames } => {
                metrics.recordings_saved_total.inc();
                NewRecording { camera_id, filename, frame_count: frames, status: RecordingStatus::Saved, error: None }
            }
            CameraEvent::RecordingFailed { camera_id, filename, frames, error } => {
                metrics.recordings_failed_total.inc();
                NewRecording { camera_id, filename, frame_count: frames, status: RecordingStatus::Failed, error: Some(error) }
            }
            _ => continue,
        };
        if let Err(e) = recordings.record(new).await {
            tracing::error!(?e, "Failed to persist recording");
        }
    }
}

async fn init_db() -> Result<SqlitePool, sqlx::Error> {
    let path = std::env::var("HOMEDASH_DB_PATH").unwrap_or_else(|_| "./data/homedash.db".to_string());
    // Ensure parent directory exists
    if let Some(parent) = Path::new(&path).parent() { let _ = std::fs::create_dir_all(parent); }
    let url = format!("sqlite://{}?mode=rwc", path);
    let pool = match SqlitePoolOptions::new().max_connections(5).connect(&url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = ?e, "Failed to open SQLite at path; falling back to in-memory DB");
            SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?
        }
    };
    // WAL for better concurrency
    let _ = sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await;
    if let Err(e) = services::run_migrations(&pool).await {
        tracing::error!(?e, "Failed to apply migrations");
        return Err(sqlx::Error::Protocol(format!("migrations failed: {e}")));
    }
    Ok(pool)
}
