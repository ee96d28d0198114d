use crate::request::FailureKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub mod http;
pub mod pool;

pub use http::HttpFetcher;
pub use pool::{PendingFetch, PoolSettings, ShutdownMode, WorkerPool};

/// Where a downloaded artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub path: PathBuf,
    pub bytes: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ArtifactMetadata {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("media not found: {0}")]
    NotFound(String),
    #[error("authentication required: {0}")]
    AuthRequired(String),
    #[error("fetch cancelled")]
    Cancelled,
    #[error("fetch failed: {0}")]
    Unknown(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Timeout(_) => FailureKind::Timeout,
            FetchError::NotFound(_) => FailureKind::NotFound,
            FetchError::AuthRequired(_) => FailureKind::AuthRequired,
            FetchError::Cancelled => FailureKind::Cancelled,
            FetchError::Unknown(_) => FailureKind::Unknown,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Unknown(e.to_string())
    }
}

/// Retrieves media for a single link.
///
/// `destination` is a path stem; implementations choose the extension and
/// report the final location in the returned metadata.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        timeout: Duration,
    ) -> Result<ArtifactMetadata, FetchError>;
}
