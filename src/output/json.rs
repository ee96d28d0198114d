use super::OutcomeObserver;
use crate::error::Result;
use crate::request::FetchResult;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Appends each outcome as one JSON document per line.
pub struct JsonObserver {
    file: Mutex<File>,
}

impl JsonObserver {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl OutcomeObserver for JsonObserver {
    fn name(&self) -> &str {
        "json"
    }

    async fn on_outcome(&self, result: &FetchResult) -> Result<()> {
        let mut file = self.file.lock().await;
        serde_json::to_writer(&mut *file, result)?;
        writeln!(file)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.file.lock().await.flush()?;
        Ok(())
    }
}
