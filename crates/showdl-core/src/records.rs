//! SQLite-based persistence for download records
//!
//! One row per show remembering which recording, if any, is downloaded.
//! This is the authoritative answer to "is this show downloaded" and lives
//! independently of the transfer engine's own queue.

use crate::error::ShowDownloadError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use showdl_types::DownloadRecord;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

/// Durable store of per-show download records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, show_id: &str) -> Result<Option<DownloadRecord>, ShowDownloadError>;

    /// Insert or replace the record for `record.show_id`
    async fn upsert(&self, record: &DownloadRecord) -> Result<(), ShowDownloadError>;

    /// Forget the downloaded recording of a show. Clearing an absent record
    /// is not an error.
    async fn clear(&self, show_id: &str) -> Result<(), ShowDownloadError>;

    /// Every show that currently has a downloaded recording
    async fn list_downloaded(&self) -> Result<Vec<DownloadRecord>, ShowDownloadError>;

    /// Shortcut for the recording id of a downloaded show
    async fn downloaded_recording(
        &self,
        show_id: &str,
    ) -> Result<Option<String>, ShowDownloadError> {
        Ok(self
            .get(show_id)
            .await?
            .and_then(|record| record.downloaded_recording_id))
    }
}

/// Database connection pool for download records
#[derive(Clone, Debug)]
pub struct DownloadRecordDatabase {
    pool: SqlitePool,
}

impl DownloadRecordDatabase {
    /// Open (or create) the record database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, ShowDownloadError> {
        let path = db_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (tests and throwaway sessions)
    pub async fn new_in_memory() -> Result<Self, ShowDownloadError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), ShowDownloadError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS show_downloads (
                show_id TEXT PRIMARY KEY,
                downloaded_recording_id TEXT,
                downloaded_format TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_show_downloads_recording
                ON show_downloads(downloaded_recording_id);
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for DownloadRecordDatabase {
    async fn get(&self, show_id: &str) -> Result<Option<DownloadRecord>, ShowDownloadError> {
        let row = sqlx::query("SELECT * FROM show_downloads WHERE show_id = ?")
            .bind(show_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(row_to_record(row)?))
    }

    async fn upsert(&self, record: &DownloadRecord) -> Result<(), ShowDownloadError> {
        sqlx::query(
            r#"
            INSERT INTO show_downloads (
                show_id, downloaded_recording_id, downloaded_format, updated_at
            ) VALUES (?, ?, ?, ?)
            ON CONFLICT(show_id) DO UPDATE SET
                downloaded_recording_id = excluded.downloaded_recording_id,
                downloaded_format = excluded.downloaded_format,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.show_id)
        .bind(record.downloaded_recording_id.as_ref())
        .bind(record.downloaded_format.as_ref())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self, show_id: &str) -> Result<(), ShowDownloadError> {
        // The row stays: other library bookkeeping may hang off it
        sqlx::query(
            r#"
            UPDATE show_downloads
            SET downloaded_recording_id = NULL, downloaded_format = NULL, updated_at = ?
            WHERE show_id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(show_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_downloaded(&self) -> Result<Vec<DownloadRecord>, ShowDownloadError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM show_downloads
            WHERE downloaded_recording_id IS NOT NULL
            ORDER BY show_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }
}

/// Convert a database row to a DownloadRecord
fn row_to_record(row: SqliteRow) -> Result<DownloadRecord, ShowDownloadError> {
    let updated_at: String = row.try_get("updated_at")?;

    Ok(DownloadRecord {
        show_id: row.try_get("show_id")?,
        downloaded_recording_id: row.try_get("downloaded_recording_id")?,
        downloaded_format: row.try_get("downloaded_format")?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| ShowDownloadError::Serialization(e.to_string()))?
            .with_timezone(&Utc),
    })
}
