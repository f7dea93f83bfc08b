use serde::{Deserialize, Serialize};

// Pushed to browsers over the camera WebSocket. Keep field names stable,
// the dashboard scripts key off them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CameraEvent {
    RecordingStarted { camera_id: String, filename: String },
    RecordingStopped { camera_id: String, filename: String, frames: usize },
    RecordingSaved { camera_id: String, filename: String, frames: usize },
    RecordingFailed { camera_id: String, filename: String, frames: usize, error: String },
    LandmarksToggled { camera_id: String, enabled: bool },
}

impl CameraEvent {
    pub fn camera_id(&self) -> &str {
        match self {
            CameraEvent::RecordingStarted { camera_id, .. }
            | CameraEvent::RecordingStopped { camera_id, .. }
            | CameraEvent::RecordingSaved { camera_id, .. }
            | CameraEvent::RecordingFailed { camera_id, .. }
            | CameraEvent::LandmarksToggled { camera_id, .. } => camera_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let evt = CameraEvent::LandmarksToggled { camera_id: "garden".into(), enabled: true };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "landmarks_toggled");
        assert_eq!(json["camera_id"], "garden");
        assert_eq!(json["enabled"], true);
    }

    #[test]
    fn camera_id_is_exposed_for_every_variant() {
        let evt = CameraEvent::RecordingFailed {
            camera_id: "hall".into(),
            filename: "x.mp4".into(),
            frames: 3,
            error: "boom".into(),
        };
        assert_eq!(evt.camera_id(), "hall");
    }
}
