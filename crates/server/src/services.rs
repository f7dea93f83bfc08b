use crate::models::*;
use sqlx::SqlitePool;
use uuid::Uuid;
use chrono::Utc;
use anyhow::Result;

pub const DEFAULT_LIST_LIMIT: i64 = 100;
pub const MAX_LIST_LIMIT: i64 = 500;

const MIGRATIONS: &str = include_str!("../migrations/001_recordings.sql");

/// Apply the schema. Statements are idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    for statement in MIGRATIONS.split(';') {
        let statement = statement.trim();
        if !statement.is_empty() {
            sqlx::query(statement).execute(db).await?;
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct RecordingService {
    db: SqlitePool,
}

impl RecordingService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn record(&self, new: NewRecording) -> Result<Recording> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let recording = sqlx::query_as::<_, Recording>(
            r#"
            INSERT INTO recordings (id, camera_id, filename, frame_count, status, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#
        )
        .bind(&id)
        .bind(&new.camera_id)
        .bind(&new.filename)
        .bind(new.frame_count as i64)
        .bind(new.status)
        .bind(&new.error)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(recording)
    }

    /// Newest first. `limit` defaults to 100 and is capped at 500.
    pub async fn list(&self, camera_id: Option<&str>, limit: Option<i64>) -> Result<Vec<Recording>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let mut query = "SELECT * FROM recordings".to_string();
        if camera_id.is_some() {
            query.push_str(" WHERE camera_id = ?");
        }
        query.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");

        let mut query_builder = sqlx::query_as::<_, Recording>(&query);
        if let Some(camera_id) = camera_id {
            query_builder = query_builder.bind(camera_id);
        }
        let recordings = query_builder.bind(limit).fetch_all(&self.db).await?;
        Ok(recordings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service() -> RecordingService {
        // one connection: every sqlite::memory: connection is its own database
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        RecordingService::new(pool)
    }

    fn saved(camera_id: &str, filename: &str) -> NewRecording {
        NewRecording {
            camera_id: camera_id.into(),
            filename: filename.into(),
            frame_count: 42,
            status: RecordingStatus::Saved,
            error: None,
        }
    }

    #[tokio::test]
    async fn record_round_trips_status_and_error() {
        let svc = service().await;
        let row = svc
            .record(NewRecording {
                camera_id: "front".into(),
                filename: "video_front_20240101_120000.mp4".into(),
                frame_count: 3,
                status: RecordingStatus::Failed,
                error: Some("ffmpeg exited with 1".into()),
            })
            .await
            .unwrap();
        assert_eq!(row.status, RecordingStatus::Failed);
        assert_eq!(row.frame_count, 3);
        assert_eq!(row.error.as_deref(), Some("ffmpeg exited with 1"));

        let listed = svc.list(None, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, row.id);
    }

    #[tokio::test]
    async fn list_filters_by_camera_newest_first() {
        let svc = service().await;
        svc.record(saved("front", "a.mp4")).await.unwrap();
        svc.record(saved("back", "b.mp4")).await.unwrap();
        svc.record(saved("front", "c.mp4")).await.unwrap();

        let front: Vec<String> = svc.list(Some("front"), None).await.unwrap().into_iter().map(|r| r.filename).collect();
        assert_eq!(front, vec!["c.mp4", "a.mp4"]);

        let limited = svc.list(None, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].filename, "c.mp4");

        // nonsense limits are clamped rather than rejected
        assert_eq!(svc.list(None, Some(0)).await.unwrap().len(), 1);
        assert_eq!(svc.list(None, Some(10_000)).await.unwrap().len(), 3);
    }
}
