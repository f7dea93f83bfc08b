use bytes::Bytes;
use chrono::{DateTime, Local};
use tracing::warn;

use homedash_core::recording_filename;

/// Frames captured during one recording session.
#[derive(Debug)]
pub struct RecordingSession {
    pub filename: String,
    pub started_at: DateTime<Local>,
    pub frames: Vec<Bytes>,
    pub truncated: bool,
}

#[derive(Debug)]
pub enum Transition {
    Idle,
    Started { filename: String },
    Capturing,
    Finished(RecordingSession),
}

/// Follows the recording flag from inside a producer loop and owns the
/// frame buffer of the active session.
pub struct RecordingTracker {
    camera_id: String,
    max_frames: usize,
    session: Option<RecordingSession>,
    // base name of the last session and how many reused it
    last_base: Option<String>,
    seq: u32,
}

impl RecordingTracker {
    pub fn new(camera_id: impl Into<String>, max_frames: usize) -> Self {
        Self { camera_id: camera_id.into(), max_frames, session: None, last_base: None, seq: 0 }
    }

    fn next_filename(&mut self, now: &DateTime<Local>) -> String {
        let base = recording_filename(&self.camera_id, now, 0);
        if self.last_base.as_deref() == Some(base.as_str()) {
            self.seq += 1;
        } else {
            self.seq = 0;
            self.last_base = Some(base);
        }
        recording_filename(&self.camera_id, now, self.seq)
    }

    /// Called once per producer iteration with the current flag value and
    /// the frame produced in that iteration, if any.
    pub fn observe(&mut self, recording: bool, frame: Option<&Bytes>, now: DateTime<Local>) -> Transition {
        match (recording, self.session.is_some()) {
            (false, false) => Transition::Idle,
            (false, true) => match self.session.take() {
                Some(session) => Transition::Finished(session),
                None => Transition::Idle,
            },
            (true, started) => {
                if !started {
                    let filename = self.next_filename(&now);
                    self.session = Some(RecordingSession { filename, started_at: now, frames: Vec::new(), truncated: false });
                }
                let Some(session) = self.session.as_mut() else {
                    return Transition::Idle;
                };
                if let Some(frame) = frame {
                    if session.frames.len() < self.max_frames {
                        session.frames.push(frame.clone());
                    } else if !session.truncated {
                        session.truncated = true;
                        warn!(camera_id = %self.camera_id, max_frames = self.max_frames, "recording buffer full; further frames are dropped");
                    }
                }
                if started {
                    Transition::Capturing
                } else {
                    Transition::Started { filename: session.filename.clone() }
                }
            }
        }
    }

    /// Hand over the active session regardless of the flag, used on shutdown.
    pub fn take(&mut self) -> Option<RecordingSession> {
        self.session.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[test]
    fn idle_while_flag_is_false() {
        let mut t = RecordingTracker::new("cam", 10);
        for i in 0..5 {
            assert!(matches!(t.observe(false, Some(&frame(i)), Local::now()), Transition::Idle));
        }
        assert!(t.take().is_none());
    }

    #[test]
    fn session_collects_frames_until_flag_drops() {
        let mut t = RecordingTracker::new("cam", 10);
        let started = t.observe(true, Some(&frame(1)), Local::now());
        let Transition::Started { filename } = started else { panic!("expected start, got {:?}", started) };
        assert!(filename.starts_with("video_cam_") && filename.ends_with(".mp4"));

        assert!(matches!(t.observe(true, Some(&frame(2)), Local::now()), Transition::Capturing));
        assert!(matches!(t.observe(true, None, Local::now()), Transition::Capturing));

        match t.observe(false, Some(&frame(3)), Local::now()) {
            Transition::Finished(session) => {
                assert_eq!(session.filename, filename);
                assert_eq!(session.frames, vec![frame(1), frame(2)]);
                assert!(!session.truncated);
            }
            other => panic!("expected finish, got {:?}", other),
        }
        assert!(t.take().is_none());
    }

    #[test]
    fn buffer_is_capped() {
        let mut t = RecordingTracker::new("cam", 3);
        for i in 0..10 {
            t.observe(true, Some(&frame(i)), Local::now());
        }
        let Transition::Finished(session) = t.observe(false, None, Local::now()) else { panic!("expected finish") };
        assert_eq!(session.frames.len(), 3);
        assert!(session.truncated);
    }

    #[test]
    fn new_session_starts_with_empty_buffer() {
        let mut t = RecordingTracker::new("cam", 10);
        t.observe(true, Some(&frame(1)), Local::now());
        t.observe(false, None, Local::now());
        t.observe(true, Some(&frame(9)), Local::now());
        let Transition::Finished(session) = t.observe(false, None, Local::now()) else { panic!("expected finish") };
        assert_eq!(session.frames, vec![frame(9)]);
    }

    #[test]
    fn sessions_in_the_same_second_get_distinct_names() {
        let mut t = RecordingTracker::new("cam", 10);
        let at = Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let mut names = Vec::new();
        for i in 0..3 {
            t.observe(true, Some(&frame(i)), at);
            let Transition::Finished(session) = t.observe(false, None, at) else { panic!("expected finish") };
            names.push(session.filename);
        }
        assert_eq!(
            names,
            vec!["video_cam_20240501_083000.mp4", "video_cam_20240501_083000_1.mp4", "video_cam_20240501_083000_2.mp4"]
        );

        // a new second starts over without a suffix
        t.observe(true, Some(&frame(7)), at + chrono::Duration::seconds(1));
        let Transition::Finished(session) = t.observe(false, None, at) else { panic!("expected finish") };
        assert_eq!(session.filename, "video_cam_20240501_083001.mp4");
    }
}
