use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub videos_dir: PathBuf,
    pub max_recording_frames: usize,
    pub recording_fps: u32,
    pub ffmpeg_bin: String,
    pub pose_model: Option<PathBuf>,
    pub pose_threshold: f32,
    pub jpeg_quality: u8,
    pub device_timeout: Duration,
    pub esp_interval: Duration,
    pub robot_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            videos_dir: PathBuf::from("static/videos"),
            max_recording_frames: 2000,
            recording_fps: 20,
            ffmpeg_bin: "ffmpeg".to_string(),
            pose_model: None,
            pose_threshold: 0.3,
            jpeg_quality: 80,
            device_timeout: Duration::from_secs(5),
            // ~20 Hz for pushed MJPEG, ~5 Hz for polled snapshots
            esp_interval: Duration::from_millis(50),
            robot_interval: Duration::from_millis(200),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl StreamConfig {
    pub fn from_env() -> Self {
        let mut cfg = StreamConfig::default();

        if let Ok(v) = env::var("HOMEDASH_VIDEOS_DIR") {
            if !v.is_empty() {
                cfg.videos_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("HOMEDASH_RECORDING_MAX_FRAMES") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.max_recording_frames = n.max(1);
            }
        }
        if let Ok(v) = env::var("HOMEDASH_RECORDING_FPS") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.recording_fps = n.clamp(1, 60);
            }
        }
        if let Ok(v) = env::var("HOMEDASH_FFMPEG_BIN") {
            if !v.is_empty() {
                cfg.ffmpeg_bin = v;
            }
        }
        if let Ok(v) = env::var("HOMEDASH_POSE_MODEL") {
            if !v.is_empty() {
                cfg.pose_model = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = env::var("HOMEDASH_POSE_THRESHOLD") {
            if let Ok(t) = v.parse::<f32>() {
                cfg.pose_threshold = t.clamp(0.0, 1.0);
            }
        }
        if let Ok(v) = env::var("HOMEDASH_DEVICE_TIMEOUT_MS") {
            if let Some(timeout) = parse_timeout_ms(&v) {
                cfg.device_timeout = timeout;
            }
        }

        cfg
    }

    pub fn interval_for(&self, kind: homedash_core::SourceKind) -> Duration {
        match kind {
            homedash_core::SourceKind::Esp => self.esp_interval,
            homedash_core::SourceKind::Robot => self.robot_interval,
        }
    }
}

/// Zero would fail every connect immediately, so it is ignored like junk.
fn parse_timeout_ms(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homedash_core::SourceKind;

    #[test]
    fn defaults_match_dashboard_conventions() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.max_recording_frames, 2000);
        assert_eq!(cfg.pose_threshold, 0.3);
        assert_eq!(cfg.interval_for(SourceKind::Esp), Duration::from_millis(50));
        assert_eq!(cfg.interval_for(SourceKind::Robot), Duration::from_millis(200));
    }

    #[test]
    fn device_timeout_rejects_zero_and_junk() {
        assert_eq!(parse_timeout_ms("2500"), Some(Duration::from_millis(2500)));
        assert_eq!(parse_timeout_ms(" 1 "), Some(Duration::from_millis(1)));
        assert_eq!(parse_timeout_ms("0"), None);
        assert_eq!(parse_timeout_ms("-5"), None);
        assert_eq!(parse_timeout_ms("soon"), None);
    }
}
