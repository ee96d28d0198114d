use super::{ArtifactMetadata, FetchError, Fetcher};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

const LOGIN_PATH: &str = "/accounts/login";

/// Downloads whatever the link serves over plain HTTP.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> crate::error::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }

    async fn download(
        &self,
        url: &Url,
        destination: &Path,
        timeout: Duration,
    ) -> Result<ArtifactMetadata, FetchError> {
        log::info!("Fetching: {}", url);

        let res = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        if res.url().path().starts_with(LOGIN_PATH) {
            return Err(FetchError::AuthRequired(format!(
                "redirected to {}",
                res.url()
            )));
        }

        let status = res.status();
        match status {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(FetchError::NotFound(format!("HTTP {}", status)));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::AuthRequired(format!("HTTP {}", status)));
            }
            _ => return Err(FetchError::Unknown(format!("HTTP {}", status))),
        }

        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut part = PartFile::new(destination.with_extension("part"));
        let mut file = fs::File::create(part.path()).await?;
        let mut bytes = 0u64;
        let mut body = res.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| classify(e, timeout))?;
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let final_path = with_media_extension(destination, content_type.as_deref());
        fs::rename(part.path(), &final_path).await?;
        part.keep();
        log::debug!("Stored {} bytes at {}", bytes, final_path.display());

        Ok(ArtifactMetadata {
            path: final_path,
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        timeout: Duration,
    ) -> Result<ArtifactMetadata, FetchError> {
        self.download(url, destination, timeout).await
    }
}

/// Removes the partial download when dropped, unless it was renamed into place.
/// Covers early returns as well as a caller's timeout dropping the future.
struct PartFile {
    path: PathBuf,
    keep: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed partial download {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Unknown(e.to_string())
    }
}

fn with_media_extension(stem: &Path, content_type: Option<&str>) -> PathBuf {
    let ext = match content_type {
        Some("video/mp4") => "mp4",
        Some("video/quicktime") => "mov",
        Some("image/jpeg") => "jpg",
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        Some("text/html") => "html",
        _ => "bin",
    };
    stem.with_extension(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_extension_from_content_type() {
        let stem = Path::new("downloads/abc-123");
        assert_eq!(
            with_media_extension(stem, Some("video/mp4")),
            PathBuf::from("downloads/abc-123.mp4")
        );
        assert_eq!(
            with_media_extension(stem, Some("application/x-unknown")),
            PathBuf::from("downloads/abc-123.bin")
        );
        assert_eq!(
            with_media_extension(stem, None),
            PathBuf::from("downloads/abc-123.bin")
        );
    }

    #[test]
    fn part_file_is_removed_unless_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let dropped = dir.path().join("a.part");
        let kept = dir.path().join("b.part");
        std::fs::write(&dropped, b"partial").unwrap();
        std::fs::write(&kept, b"whole").unwrap();

        drop(PartFile::new(dropped.clone()));
        let mut guard = PartFile::new(kept.clone());
        guard.keep();
        drop(guard);

        assert!(!dropped.exists());
        assert!(kept.exists());
    }
}
