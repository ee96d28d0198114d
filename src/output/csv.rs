use super::OutcomeObserver;
use crate::error::{Error, Result};
use crate::request::{FetchOutcome, FetchResult, FetchStatus};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::Mutex;

#[derive(Serialize)]
struct Row<'a> {
    request_id: String,
    url: &'a str,
    user_id: &'a str,
    channel_id: &'a str,
    guild_id: &'a str,
    status: FetchStatus,
    detail: String,
    submitted_at: String,
}

pub struct CsvObserver {
    writer: Mutex<csv::Writer<std::fs::File>>,
}

impl CsvObserver {
    pub fn new(path: PathBuf) -> Result<Self> {
        let writer = csv::Writer::from_path(path).map_err(|e| Error::Internal(e.to_string()))?;

        Ok(Self {
            writer: Mutex::new(writer),
        })
    }
}

#[async_trait]
impl OutcomeObserver for CsvObserver {
    fn name(&self) -> &str {
        "csv"
    }

    async fn on_outcome(&self, result: &FetchResult) -> Result<()> {
        let request = &result.request;
        let detail = match &result.outcome {
            FetchOutcome::Succeeded(artifact) => artifact.path.display().to_string(),
            FetchOutcome::Failed { kind } => format!("{:?}", kind),
            FetchOutcome::RateLimited { reason, .. } => format!("{:?}", reason),
        };
        let url = request.link.url.as_str();

        let mut writer = self.writer.lock().await;
        writer
            .serialize(Row {
                request_id: request.id.to_string(),
                url,
                user_id: &request.user_id,
                channel_id: &request.channel_id,
                guild_id: request.guild_id.as_deref().unwrap_or(""),
                status: request.status(),
                detail,
                submitted_at: request.submitted_at.to_rfc3339(),
            })
            .map_err(|e| Error::Internal(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.writer.lock().await.flush()?;
        Ok(())
    }
}
