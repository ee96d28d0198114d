use super::OutcomeObserver;
use crate::error::{Error, Result};
use crate::request::{FetchOutcome, FetchResult};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use std::path::PathBuf;

/// Keeps a ledger of outcomes in a SQLite table.
pub struct SqliteObserver {
    pool: SqlitePool,
    table_name: String,
}

impl SqliteObserver {
    pub async fn new(path: PathBuf, table_name: String) -> Result<Self> {
        if !table_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Config(format!("Invalid table name: {}", table_name)));
        }

        let conn_str = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&conn_str).await?;

        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                request_id TEXT NOT NULL,
                url TEXT NOT NULL,
                user_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                guild_id TEXT,
                status TEXT NOT NULL,
                detail TEXT,
                bytes INTEGER,
                submitted_at TEXT NOT NULL
            )",
            table_name
        );
        sqlx::query(&query).execute(&pool).await?;

        Ok(Self { pool, table_name })
    }
}

#[async_trait]
impl OutcomeObserver for SqliteObserver {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn on_outcome(&self, result: &FetchResult) -> Result<()> {
        let request = &result.request;
        let (detail, bytes) = match &result.outcome {
            FetchOutcome::Succeeded(artifact) => {
                (artifact.path.display().to_string(), Some(artifact.bytes as i64))
            }
            FetchOutcome::Failed { kind } => (format!("{:?}", kind), None),
            FetchOutcome::RateLimited { reason, .. } => (format!("{:?}", reason), None),
        };
        let status = serde_json::to_value(request.status())?
            .as_str()
            .unwrap_or_default()
            .to_string();

        let query = format!(
            "INSERT INTO {} (request_id, url, user_id, channel_id, guild_id, status, detail, bytes, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            self.table_name
        );

        sqlx::query(&query)
            .bind(request.id.to_string())
            .bind(request.link.url.as_str())
            .bind(request.user_id.as_str())
            .bind(request.channel_id.as_str())
            .bind(request.guild_id.as_deref())
            .bind(status)
            .bind(detail)
            .bind(bytes)
            .bind(request.submitted_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
