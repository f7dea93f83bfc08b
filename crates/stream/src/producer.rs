use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Local;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use homedash_core::CameraEvent;

use crate::camera::CameraHandle;
use crate::encoder::{EncodeJob, EncoderHandle};
use crate::error::{Result, StreamError};
use crate::frame::process_frame;
use crate::pose::PoseEstimator;
use crate::recording::{RecordingSession, RecordingTracker, Transition};
use crate::source::FrameSource;

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_recording_frames: usize,
    pub pose_threshold: f32,
    pub jpeg_quality: u8,
}

/// The single loop pulling frames for one camera.
pub struct Producer {
    camera: Arc<CameraHandle>,
    source: Box<dyn FrameSource>,
    estimator: Option<Box<dyn PoseEstimator>>,
    encoder: EncoderHandle,
    events: broadcast::Sender<CameraEvent>,
    settings: ProducerSettings,
    warned_no_model: bool,
}

impl Producer {
    pub fn new(
        camera: Arc<CameraHandle>,
        source: Box<dyn FrameSource>,
        estimator: Option<Box<dyn PoseEstimator>>,
        encoder: EncoderHandle,
        events: broadcast::Sender<CameraEvent>,
        settings: ProducerSettings,
    ) -> Self {
        Self { camera, source, estimator, encoder, events, settings, warned_no_model: false }
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let camera_id = self.camera.id().to_string();
        info!(camera_id = %camera_id, "producer started");
        let mut tracker = RecordingTracker::new(camera_id.clone(), self.settings.max_recording_frames);
        let mut backoff = self.settings.initial_backoff;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let pulled = tokio::select! {
                res = self.source.next_frame() => res,
                _ = shutdown.changed() => break,
            };

            let mut delay = self.settings.interval;
            let frame = match pulled {
                Ok(jpeg) => {
                    backoff = self.settings.initial_backoff;
                    match self.process(jpeg).await {
                        Ok(frame) => Some(frame),
                        Err(e) => {
                            warn!(camera_id = %camera_id, error = %e, "dropping frame");
                            self.camera.record_drop();
                            None
                        }
                    }
                }
                Err(e) => {
                    warn!(camera_id = %camera_id, error = %e, retry_in_ms = backoff.as_millis() as u64, "camera source unavailable");
                    self.camera.record_drop();
                    self.source.reset();
                    delay = backoff;
                    backoff = (backoff * 2).min(self.settings.max_backoff);
                    None
                }
            };

            self.track(&mut tracker, frame.as_ref());
            if let Some(frame) = frame {
                self.camera.publish(frame);
            }

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        if let Some(session) = tracker.take() {
            info!(camera_id = %camera_id, "flushing active recording on shutdown");
            self.finish(session);
        }
        self.camera.mark_stopped();
        info!(camera_id = %camera_id, "producer stopped");
    }

    async fn process(&mut self, jpeg: Bytes) -> Result<Bytes> {
        let overlay = self.camera.landmarks_enabled();
        let mut estimator = if overlay { self.estimator.take() } else { None };
        if overlay && estimator.is_none() && !self.warned_no_model {
            self.warned_no_model = true;
            warn!(camera_id = %self.camera.id(), "landmark overlay requested but no pose model is loaded");
        }
        let threshold = self.settings.pose_threshold;
        let quality = self.settings.jpeg_quality;

        let joined = tokio::task::spawn_blocking(move || {
            let model = estimator.as_mut().map(|e| &mut **e as &mut dyn PoseEstimator);
            let res = process_frame(jpeg, model, threshold, quality);
            (res, estimator)
        })
        .await;

        match joined {
            Ok((res, estimator)) => {
                if estimator.is_some() {
                    self.estimator = estimator;
                }
                res
            }
            Err(e) => Err(StreamError::Model(format!("frame worker failed: {}", e))),
        }
    }

    fn track(&mut self, tracker: &mut RecordingTracker, frame: Option<&Bytes>) {
        match tracker.observe(self.camera.is_recording(), frame, Local::now()) {
            Transition::Started { filename } => {
                info!(camera_id = %self.camera.id(), filename = %filename, "recording started");
                let _ = self.events.send(CameraEvent::RecordingStarted {
                    camera_id: self.camera.id().to_string(),
                    filename,
                });
            }
            Transition::Finished(session) => self.finish(session),
            Transition::Capturing | Transition::Idle => {}
        }
    }

    fn finish(&self, session: RecordingSession) {
        let frames = session.frames.len();
        let duration_ms = (Local::now() - session.started_at).num_milliseconds().max(0);
        info!(camera_id = %self.camera.id(), filename = %session.filename, frames, duration_ms, truncated = session.truncated, "recording stopped");
        let _ = self.events.send(CameraEvent::RecordingStopped {
            camera_id: self.camera.id().to_string(),
            filename: session.filename.clone(),
            frames,
        });
        debug!(camera_id = %self.camera.id(), "handing recording to encoder");
        self.encoder.submit(EncodeJob {
            camera_id: self.camera.id().to_string(),
            filename: session.filename,
            frames: session.frames,
        });
    }
}
