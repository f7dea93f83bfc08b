use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::watch;

use homedash_core::CameraDescriptor;

/// Shared per-camera state. The producer writes the latest frame, request
/// handlers read it and flip the flags.
pub struct CameraHandle {
    descriptor: CameraDescriptor,
    recording: AtomicBool,
    landmarks: AtomicBool,
    started: AtomicBool,
    latest: watch::Sender<Option<Bytes>>,
    frames_produced: AtomicU64,
    frames_dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    #[serde(flatten)]
    pub descriptor: CameraDescriptor,
    pub recording: bool,
    pub landmarks: bool,
    pub producer_running: bool,
    pub has_frame: bool,
    pub frames_produced: u64,
    pub frames_dropped: u64,
}

impl CameraHandle {
    pub fn new(descriptor: CameraDescriptor) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            descriptor,
            recording: AtomicBool::new(false),
            landmarks: AtomicBool::new(false),
            started: AtomicBool::new(false),
            latest,
            frames_produced: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &CameraDescriptor {
        &self.descriptor
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    /// Returns the previous value so callers can tell a no-op from a change.
    pub fn set_recording(&self, on: bool) -> bool {
        self.recording.swap(on, Ordering::Relaxed)
    }

    pub fn landmarks_enabled(&self) -> bool {
        self.landmarks.load(Ordering::Relaxed)
    }

    /// Flip the overlay flag and return the new value.
    pub fn toggle_landmarks(&self) -> bool {
        !self.landmarks.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn latest_frame(&self) -> Option<Bytes> {
        self.latest.borrow().clone()
    }

    /// Receiver that wakes whenever the producer publishes a frame.
    pub fn subscribe(&self) -> watch::Receiver<Option<Bytes>> {
        self.latest.subscribe()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// True for exactly one caller; that caller owns spawning the producer.
    pub(crate) fn claim_start(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_stopped(&self) {
        self.started.store(false, Ordering::Release);
    }

    pub(crate) fn publish(&self, frame: Bytes) {
        self.frames_produced.fetch_add(1, Ordering::Relaxed);
        self.latest.send_replace(Some(frame));
    }

    pub(crate) fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> CameraStatus {
        CameraStatus {
            descriptor: self.descriptor.clone(),
            recording: self.is_recording(),
            landmarks: self.landmarks_enabled(),
            producer_running: self.is_started(),
            has_frame: self.latest.borrow().is_some(),
            frames_produced: self.frames_produced(),
            frames_dropped: self.frames_dropped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homedash_core::SourceKind;

    fn handle() -> CameraHandle {
        CameraHandle::new(CameraDescriptor::new("cam", "10.0.0.2", None, SourceKind::Esp))
    }

    #[test]
    fn landmark_toggle_pairs_restore_state() {
        let cam = handle();
        let before = cam.landmarks_enabled();
        assert_eq!(cam.toggle_landmarks(), !before);
        assert_eq!(cam.toggle_landmarks(), before);
        assert_eq!(cam.landmarks_enabled(), before);
    }

    #[test]
    fn recording_flag_is_idempotent() {
        let cam = handle();
        assert!(!cam.set_recording(true));
        assert!(cam.set_recording(true));
        assert!(cam.is_recording());
        assert!(cam.set_recording(false));
        assert!(!cam.set_recording(false));
        assert!(!cam.is_recording());
    }

    #[test]
    fn only_one_start_claim_succeeds() {
        let cam = handle();
        assert!(cam.claim_start());
        assert!(!cam.claim_start());
        cam.mark_stopped();
        assert!(cam.claim_start());
    }

    #[tokio::test]
    async fn subscribers_see_published_frames() {
        let cam = handle();
        let mut rx = cam.subscribe();
        assert!(rx.borrow().is_none());
        cam.publish(Bytes::from_static(b"one"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_deref(), Some(&b"one"[..]));
        assert_eq!(cam.latest_frame().as_deref(), Some(&b"one"[..]));
        assert_eq!(cam.frames_produced(), 1);
    }
}
