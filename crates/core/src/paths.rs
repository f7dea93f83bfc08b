// URL layout helpers for camera-scoped endpoints, matching the axum routes
// registered by the server.

pub const ROOT: &str = "/camera";

pub fn camera_page(camera_id: &str) -> String {
    format!("{}/{}", ROOT, camera_id)
}

pub fn stream(camera_id: &str) -> String { format!("{}/stream", camera_page(camera_id)) }
pub fn snapshot(camera_id: &str) -> String { format!("{}/snapshot", camera_page(camera_id)) }
pub fn start_recording(camera_id: &str) -> String { format!("{}/start_recording", camera_page(camera_id)) }
pub fn stop_recording(camera_id: &str) -> String { format!("{}/stop_recording", camera_page(camera_id)) }
pub fn recording_status(camera_id: &str) -> String { format!("{}/recording_status", camera_page(camera_id)) }
pub fn toggle_landmarks(camera_id: &str) -> String { format!("{}/toggle_landmarks", camera_page(camera_id)) }

// Saved recordings are served from here
pub const VIDEOS_ROOT: &str = "/videos";

pub fn video(filename: &str) -> String {
    format!("{}/{}", VIDEOS_ROOT, filename)
}
