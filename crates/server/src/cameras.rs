//! Per-camera pages, the MJPEG stream and the control endpoints.
//!
//! Every route takes the camera id from the path and answers 404 for ids
//! that are not in the registry.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use homedash_core::paths;
use prometheus::IntGauge;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::models::{LandmarkToggleResponse, RecordingStatusResponse};
use crate::AppState;

const CAMERA_PAGE: &str = include_str!("static/camera.html");

fn camera_not_found(camera_id: &str) -> Response {
    tracing::debug!(camera_id = %camera_id, "unknown camera requested");
    (StatusCode::NOT_FOUND, "Camera not found").into_response()
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub async fn camera_page(Path(camera_id): Path<String>, State(state): State<AppState>) -> Response {
    let Some(camera) = state.cameras.get(&camera_id) else {
        return camera_not_found(&camera_id);
    };
    let id = camera.id();
    let page = CAMERA_PAGE
        .replace("{{name}}", &escape_html(camera.descriptor().display_name()))
        .replace("{{stream_url}}", &paths::stream(id))
        .replace("{{snapshot_url}}", &paths::snapshot(id))
        .replace("{{start_recording_url}}", &paths::start_recording(id))
        .replace("{{stop_recording_url}}", &paths::stop_recording(id))
        .replace("{{recording_status_url}}", &paths::recording_status(id))
        .replace("{{toggle_landmarks_url}}", &paths::toggle_landmarks(id));
    Html(page).into_response()
}

/// Keeps the MJPEG client gauge in step with open streams.
struct ClientGuard(IntGauge);

impl ClientGuard {
    fn new(gauge: IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// `multipart/x-mixed-replace` response. A part is written each time the
/// producer publishes a frame; nothing is sent before the first frame
/// arrives. The body only ends when the registry shuts down, and dropping
/// it leaves the producer running.
pub async fn camera_stream(Path(camera_id): Path<String>, State(state): State<AppState>) -> Response {
    let Some(frames) = state.cameras.subscribe(&camera_id) else {
        return camera_not_found(&camera_id);
    };
    tracing::debug!(camera_id = %camera_id, "MJPEG client connected");
    let guard = ClientGuard::new(state.metrics.mjpeg_clients.clone());

    let stream = WatchStream::new(frames).filter_map(move |frame| {
        let _client = &guard;
        frame.map(|jpeg| Ok::<_, std::convert::Infallible>(homedash_stream::multipart_part(&jpeg)))
    });
    let stream = futures_util::StreamExt::take_until(
        stream,
        homedash_stream::wait_for_shutdown(state.cameras.shutdown_signal()),
    );

    (
        [
            (CONTENT_TYPE, homedash_stream::CONTENT_TYPE),
            (CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (PRAGMA, "no-cache"),
            (EXPIRES, "0"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Latest frame as a single JPEG.
pub async fn camera_snapshot(Path(camera_id): Path<String>, State(state): State<AppState>) -> Response {
    let Some(camera) = state.cameras.ensure_started(&camera_id) else {
        return camera_not_found(&camera_id);
    };
    match camera.latest_frame() {
        Some(jpeg) => ([(CONTENT_TYPE, "image/jpeg"), (CACHE_CONTROL, "no-cache")], jpeg).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No frame yet").into_response(),
    }
}

pub async fn start_recording(Path(camera_id): Path<String>, State(state): State<AppState>) -> Response {
    match state.cameras.set_recording(&camera_id, true) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => camera_not_found(&camera_id),
    }
}

pub async fn stop_recording(Path(camera_id): Path<String>, State(state): State<AppState>) -> Response {
    match state.cameras.set_recording(&camera_id, false) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => camera_not_found(&camera_id),
    }
}

pub async fn toggle_landmarks(Path(camera_id): Path<String>, State(state): State<AppState>) -> Response {
    match state.cameras.toggle_landmarks(&camera_id) {
        Some(enabled) => Json(LandmarkToggleResponse { landmark_detection: enabled }).into_response(),
        None => camera_not_found(&camera_id),
    }
}

pub async fn recording_status(Path(camera_id): Path<String>, State(state): State<AppState>) -> Response {
    match state.cameras.get(&camera_id) {
        Some(camera) => Json(RecordingStatusResponse { recording: camera.is_recording() }).into_response(),
        None => camera_not_found(&camera_id),
    }
}

pub async fn api_list_cameras(State(state): State<AppState>) -> Response {
    let cameras: Vec<_> = state.cameras.cameras().map(|c| c.status()).collect();
    Json(serde_json::json!({ "cameras": cameras })).into_response()
}
