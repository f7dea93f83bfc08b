use chrono::{DateTime, TimeZone};

/// Output name for a recording session started at `started_at`.
///
/// Timestamps have one-second resolution; `seq` tells apart sessions of the
/// same camera that start within the same second (0 adds no suffix).
pub fn recording_filename<Tz: TimeZone>(camera_id: &str, started_at: &DateTime<Tz>, seq: u32) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let stamp = started_at.format("%Y%m%d_%H%M%S");
    match seq {
        0 => format!("video_{}_{}.mp4", camera_id, stamp),
        n => format!("video_{}_{}_{}.mp4", camera_id, stamp, n),
    }
}

/// Name of the raw MJPEG file written before transcoding.
pub fn intermediate_filename(filename: &str) -> String {
    let stem = filename.strip_suffix(".mp4").unwrap_or(filename);
    format!("{}.mjpeg", stem)
}
