use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ESP_STREAM_PORT: u16 = 81;

/// Where a camera's frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// ESP32-CAM style firmware exposing a persistent MJPEG stream.
    Esp,
    /// Robot firmware that only answers single JPEG snapshot requests.
    Robot,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Esp => "esp",
            SourceKind::Robot => "robot",
        };
        write!(f, "{}", s)
    }
}

/// Static description of one configured camera. Immutable for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: String,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl CameraDescriptor {
    pub fn new(id: impl Into<String>, ip: impl Into<String>, port: Option<u16>, kind: SourceKind) -> Self {
        Self { id: id.into(), ip: ip.into(), port, kind, name: None, room: None }
    }

    /// URL the producer pulls frames from.
    ///
    /// `esp` sources stream from `/stream` (port 81 unless configured),
    /// `robot` sources are polled on `/capture`.
    pub fn source_url(&self) -> String {
        match self.kind {
            SourceKind::Esp => {
                let port = self.port.unwrap_or(DEFAULT_ESP_STREAM_PORT);
                format!("http://{}:{}/stream", self.ip, port)
            }
            SourceKind::Robot => match self.port {
                Some(port) => format!("http://{}:{}/capture", self.ip, port),
                None => format!("http://{}/capture", self.ip),
            },
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraConfigError {
    #[error("invalid camera config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid camera id '{0}': use letters, digits, '-' or '_'")]
    InvalidId(String),
    #[error("camera '{0}' has an empty ip")]
    MissingIp(String),
}

#[derive(Deserialize)]
struct CamerasFile {
    #[serde(default)]
    cameras: BTreeMap<String, CameraEntry>,
}

#[derive(Deserialize)]
struct CameraEntry {
    ip: String,
    port: Option<u16>,
    #[serde(default = "default_kind")]
    kind: SourceKind,
    name: Option<String>,
    room: Option<String>,
}

fn default_kind() -> SourceKind {
    SourceKind::Esp
}

/// Parse the `[cameras.<id>]` tables of the dashboard config file.
/// Descriptors come back ordered by id.
pub fn parse_cameras(input: &str) -> Result<Vec<CameraDescriptor>, CameraConfigError> {
    let file: CamerasFile = toml::from_str(input)?;
    let mut out = Vec::with_capacity(file.cameras.len());
    for (id, entry) in file.cameras {
        if !is_valid_id(&id) {
            return Err(CameraConfigError::InvalidId(id));
        }
        let ip = entry.ip.trim().to_string();
        if ip.is_empty() {
            return Err(CameraConfigError::MissingIp(id));
        }
        out.push(CameraDescriptor {
            id,
            ip,
            port: entry.port,
            kind: entry.kind,
            name: entry.name,
            room: entry.room,
        });
    }
    Ok(out)
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
