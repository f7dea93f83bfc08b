use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use homedash_core::{CameraDescriptor, CameraEvent};

use crate::camera::CameraHandle;
use crate::config::StreamConfig;
use crate::encoder::{EncodeOutcome, EncoderHandle, EncoderSettings};
use crate::pose::PoseEstimator;
use crate::producer::{Producer, ProducerSettings};
use crate::source::{source_for, FrameSource};

pub type SourceFactory = Arc<dyn Fn(&CameraDescriptor) -> Box<dyn FrameSource> + Send + Sync>;
pub type EstimatorFactory = Arc<dyn Fn() -> Option<Box<dyn PoseEstimator>> + Send + Sync>;

const EVENT_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns every configured camera, its producer task and the shared encoder.
pub struct CameraRegistry {
    cameras: BTreeMap<String, Arc<CameraHandle>>,
    config: StreamConfig,
    sources: SourceFactory,
    estimators: EstimatorFactory,
    encoder: EncoderHandle,
    events: broadcast::Sender<CameraEvent>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl CameraRegistry {
    /// Registry talking to real devices over HTTP. Must be called inside a
    /// tokio runtime.
    pub fn new(descriptors: Vec<CameraDescriptor>, config: StreamConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(config.device_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default http client");
                Client::new()
            });
        let timeout = config.device_timeout;
        let sources: SourceFactory = Arc::new(move |d: &CameraDescriptor| source_for(d, client.clone(), timeout));
        let estimators = default_estimators(&config);
        Self::with_factories(descriptors, config, sources, estimators)
    }

    pub fn with_factories(
        descriptors: Vec<CameraDescriptor>,
        config: StreamConfig,
        sources: SourceFactory,
        estimators: EstimatorFactory,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (encoder, encoder_task) = EncoderHandle::spawn(
            EncoderSettings {
                videos_dir: config.videos_dir.clone(),
                ffmpeg_bin: config.ffmpeg_bin.clone(),
                fps: config.recording_fps,
            },
            outcomes_tx,
        );
        let forwarder = tokio::spawn(forward_outcomes(outcomes_rx, events.clone()));

        let cameras = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(CameraHandle::new(d))))
            .collect::<BTreeMap<_, _>>();
        info!(count = cameras.len(), "camera registry ready");

        Self {
            cameras,
            config,
            sources,
            estimators,
            encoder,
            events,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            background: Mutex::new(vec![encoder_task, forwarder]),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<CameraHandle>> {
        self.cameras.get(id).cloned()
    }

    /// Cameras ordered by id.
    pub fn cameras(&self) -> impl Iterator<Item = &Arc<CameraHandle>> {
        self.cameras.values()
    }

    pub fn events(&self) -> broadcast::Receiver<CameraEvent> {
        self.events.subscribe()
    }

    /// Look up a camera and make sure its producer is running. `None` for
    /// unknown ids.
    pub fn ensure_started(&self, id: &str) -> Option<Arc<CameraHandle>> {
        let camera = self.get(id)?;
        self.spawn_producer(&camera);
        Some(camera)
    }

    /// Frame receiver for a stream client; starts the producer on first use.
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<Option<Bytes>>> {
        self.ensure_started(id).map(|camera| camera.subscribe())
    }

    pub fn start_all(&self) {
        for camera in self.cameras.values() {
            self.spawn_producer(camera);
        }
    }

    /// Set the recording flag. Turning it on starts the producer so there
    /// are frames to capture. Returns `None` for unknown ids.
    pub fn set_recording(&self, id: &str, on: bool) -> Option<bool> {
        let camera = if on { self.ensure_started(id)? } else { self.get(id)? };
        let previous = camera.set_recording(on);
        if previous != on {
            info!(camera_id = %id, recording = on, "recording flag changed");
        }
        Some(previous)
    }

    /// Flip the landmark overlay and return the new value.
    pub fn toggle_landmarks(&self, id: &str) -> Option<bool> {
        let camera = self.get(id)?;
        let enabled = camera.toggle_landmarks();
        info!(camera_id = %id, enabled, "landmark overlay toggled");
        let _ = self.events.send(CameraEvent::LandmarksToggled { camera_id: id.to_string(), enabled });
        Some(enabled)
    }

    fn spawn_producer(&self, camera: &Arc<CameraHandle>) {
        if *self.shutdown.borrow() || !camera.claim_start() {
            return;
        }
        let descriptor = camera.descriptor();
        let settings = ProducerSettings {
            interval: self.config.interval_for(descriptor.kind),
            initial_backoff: self.config.initial_backoff,
            max_backoff: self.config.max_backoff,
            max_recording_frames: self.config.max_recording_frames,
            pose_threshold: self.config.pose_threshold,
            jpeg_quality: self.config.jpeg_quality,
        };
        let producer = Producer::new(
            camera.clone(),
            (self.sources)(descriptor),
            (self.estimators)(),
            self.encoder.clone(),
            self.events.clone(),
            settings,
        );
        let task = tokio::spawn(producer.run(self.shutdown.subscribe()));
        match self.tasks.lock() {
            Ok(mut tasks) => {
                tasks.retain(|t| !t.is_finished());
                tasks.push(task);
            }
            Err(poisoned) => poisoned.into_inner().push(task),
        }
    }

    /// Receiver that flips to `true` once shutdown begins. Long-lived
    /// responses wait on it to end themselves.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Tell producers and open streams to stop without waiting for them.
    pub fn signal_shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("camera shutdown requested");
        }
    }

    /// Stop every producer, flushing active recordings to the encoder, then
    /// wait a bounded time for pending encodes.
    pub async fn shutdown(&self) {
        self.signal_shutdown();
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        info!(producers = tasks.len(), "stopping camera producers");
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("producer did not stop in time");
            }
        }
        for camera in self.cameras.values() {
            camera.set_recording(false);
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while self.encoder.pending() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(pending = self.encoder.pending(), "giving up on pending recordings");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for CameraRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown.send_replace(true);
        if let Ok(background) = self.background.lock() {
            for task in background.iter() {
                task.abort();
            }
        }
    }
}

/// Resolves once `signal` reads `true` or its registry is gone.
pub async fn wait_for_shutdown(mut signal: watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}

async fn forward_outcomes(mut outcomes: mpsc::UnboundedReceiver<EncodeOutcome>, events: broadcast::Sender<CameraEvent>) {
    while let Some(outcome) = outcomes.recv().await {
        let event = match outcome.result {
            Ok(_) => CameraEvent::RecordingSaved {
                camera_id: outcome.camera_id,
                filename: outcome.filename,
                frames: outcome.frames,
            },
            Err(error) => CameraEvent::RecordingFailed {
                camera_id: outcome.camera_id,
                filename: outcome.filename,
                frames: outcome.frames,
                error,
            },
        };
        let _ = events.send(event);
    }
}

#[cfg(feature = "pose-tract")]
fn default_estimators(config: &StreamConfig) -> EstimatorFactory {
    use crate::pose::MoveNet;

    let Some(path) = config.pose_model.clone() else {
        info!("no pose model configured; landmark overlay disabled");
        return Arc::new(|| None);
    };
    Arc::new(move || match MoveNet::load(&path) {
        Ok(model) => Some(Box::new(model) as Box<dyn PoseEstimator>),
        Err(e) => {
            warn!(error = %e, "pose model failed to load; landmark overlay disabled");
            None
        }
    })
}

#[cfg(not(feature = "pose-tract"))]
fn default_estimators(config: &StreamConfig) -> EstimatorFactory {
    if config.pose_model.is_some() {
        warn!("HOMEDASH_POSE_MODEL is set but this build has no pose backend (enable the pose-tract feature)");
    }
    Arc::new(|| None)
}
