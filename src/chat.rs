use crate::error::{Error, Result};
use crate::request::{FetchOutcome, FetchResult};
use async_trait::async_trait;
use indicatif::MultiProgress;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// An inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub author_id: String,
    #[serde(default)]
    pub author_is_bot: bool,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub content: String,
}

/// Sends text back to a chat channel. Delivery is best effort.
#[async_trait]
pub trait ChatReplier: Send + Sync {
    async fn reply(&self, channel_id: &str, text: &str) -> Result<()>;
}

/// Writes replies to the terminal.
pub struct ConsoleChat {
    multi: Option<Arc<MultiProgress>>,
}

impl ConsoleChat {
    pub fn new(multi: Option<Arc<MultiProgress>>) -> Self {
        Self { multi }
    }
}

#[async_trait]
impl ChatReplier for ConsoleChat {
    async fn reply(&self, channel_id: &str, text: &str) -> Result<()> {
        let line = format!("#{} <- {}", channel_id, text);
        match &self.multi {
            Some(multi) => multi
                .println(line)
                .map_err(|e| Error::Internal(e.to_string()))?,
            None => println!("{}", line),
        }
        Ok(())
    }
}

pub fn acknowledgement(accepted: usize) -> String {
    if accepted == 1 {
        "🔄 Processing Instagram reel...".to_string()
    } else {
        format!("🔄 Processing {} Instagram links...", accepted)
    }
}

/// User-facing text for a finished request. Failure detail stays in the logs.
pub fn outcome_message(result: &FetchResult) -> String {
    let url = &result.request.link.url;
    match &result.outcome {
        FetchOutcome::Succeeded(artifact) => format!(
            "✅ Downloaded {} as {} ({})",
            url,
            artifact.file_name(),
            human_bytes(artifact.bytes)
        ),
        FetchOutcome::Failed { .. } => format!("❌ Sorry, I couldn't fetch that: {}", url),
        FetchOutcome::RateLimited { retry_after, .. } => format!(
            "⏳ I'm at my download limit right now. Try {} again in about {}.",
            url,
            eta(*retry_after)
        ),
    }
}

fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} bytes", bytes)
    }
}

fn eta(wait: Duration) -> String {
    let secs = wait.as_secs().max(1);
    if secs < 60 {
        plural(secs, "second")
    } else if secs < 3600 {
        plural(secs.div_ceil(60), "minute")
    } else {
        plural(secs.div_ceil(3600), "hour")
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}
