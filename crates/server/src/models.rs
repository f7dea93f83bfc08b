use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Type, Decode, Encode};
use sqlx::sqlite::{SqliteTypeInfo, SqliteValueRef};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Recording {
    pub id: String, // UUID as string
    pub camera_id: String,
    pub filename: String,
    pub frame_count: i64,
    pub status: RecordingStatus,
    pub error: Option<String>, // ffmpeg stderr on failure
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Saved,  // MP4 written, intermediate removed
    Failed, // transcode failed, intermediate kept
}

// SQLx implementations for RecordingStatus
impl Type<sqlx::Sqlite> for RecordingStatus {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for RecordingStatus {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for RecordingStatus {
    fn encode_by_ref(&self, buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>) -> sqlx::encode::IsNull {
        <String as Encode<sqlx::Sqlite>>::encode_by_ref(&self.to_string(), buf)
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordingStatus::Saved => "saved",
            RecordingStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RecordingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saved" => Ok(RecordingStatus::Saved),
            "failed" => Ok(RecordingStatus::Failed),
            _ => Err(format!("Invalid recording status: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRecording {
    pub camera_id: String,
    pub filename: String,
    pub frame_count: usize,
    pub status: RecordingStatus,
    pub error: Option<String>,
}

/// A recording row plus the URL of its MP4, when one was written.
#[derive(Debug, Serialize)]
pub struct RecordingView {
    #[serde(flatten)]
    pub recording: Recording,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<Recording> for RecordingView {
    fn from(recording: Recording) -> Self {
        let url = match recording.status {
            RecordingStatus::Saved => Some(homedash_core::paths::video(&recording.filename)),
            RecordingStatus::Failed => None,
        };
        Self { recording, url }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordingListQuery {
    pub camera_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct EventStreamQuery {
    pub camera_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LandmarkToggleResponse {
    pub landmark_detection: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordingStatusResponse {
    pub recording: bool,
}
