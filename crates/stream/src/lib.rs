//! Per-camera frame pipeline: pull JPEGs from devices, optionally draw pose
//! landmarks, fan the latest frame out to viewers and turn recording
//! sessions into MP4 files.

pub mod camera;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod mjpeg;
pub mod pose;
pub mod producer;
pub mod recording;
pub mod registry;
pub mod source;

pub use camera::{CameraHandle, CameraStatus};
pub use config::StreamConfig;
pub use encoder::{EncodeJob, EncodeOutcome, EncoderHandle, EncoderSettings};
pub use error::{Result, StreamError};
pub use mjpeg::{multipart_part, BOUNDARY, CONTENT_TYPE};
pub use pose::{Keypoint, PoseEstimator};
pub use registry::{wait_for_shutdown, CameraRegistry, EstimatorFactory, SourceFactory};
pub use source::{source_for, FrameSource};
