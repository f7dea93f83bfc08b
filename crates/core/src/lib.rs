pub mod camera;
pub mod events;
pub mod paths;
pub mod recording;

pub use camera::{parse_cameras, CameraConfigError, CameraDescriptor, SourceKind};
pub use events::CameraEvent;
pub use recording::{intermediate_filename, recording_filename};
