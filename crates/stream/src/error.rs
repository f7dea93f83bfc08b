use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("camera answered with status {0}")]
    Status(u16),
    #[error("camera stream ended")]
    StreamEnded,
    #[error("empty frame")]
    EmptyFrame,
    #[error("jpeg decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("jpeg encode failed: {0}")]
    Encode(#[source] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transcode failed: {0}")]
    Transcode(String),
    #[error("pose model error: {0}")]
    Model(String),
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;
