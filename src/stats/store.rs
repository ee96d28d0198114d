use crate::error::{Error, Result};
use crate::request::{FetchRequest, FetchResult};
use crate::stats::snapshot::StatsSnapshot;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};

/// Durable statistics backed by a single JSON file.
///
/// Every change goes through [`StatsStore::update`], which holds the state
/// lock across the write so concurrent callers never lose an update. A
/// write lands in a temporary file that is renamed over the committed one,
/// so an interrupted write leaves the previous snapshot intact.
pub struct StatsStore {
    path: PathBuf,
    recent_limit: usize,
    state: Mutex<StatsSnapshot>,
    watcher: watch::Sender<StatsSnapshot>,
}

impl StatsStore {
    /// Opens the store. Never fails: unreadable state falls back to zeroed counters.
    pub async fn open(path: impl Into<PathBuf>, recent_limit: usize) -> Self {
        let path = path.into();
        let tmp = temp_path(&path);

        match fs::remove_file(&tmp).await {
            Ok(()) => log::warn!("Removed interrupted stats write at {}", tmp.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {}", tmp.display(), e),
        }

        let mut snapshot = match Self::read(&path).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                log::info!("No stats at {}, starting fresh", path.display());
                StatsSnapshot::default()
            }
            Err(e) => {
                log::warn!("{}; starting from zeroed statistics", e);
                StatsSnapshot::default()
            }
        };

        let stale = snapshot.drop_stale_pending();
        if stale > 0 {
            log::warn!("Dropped {} request(s) left in flight by a previous run", stale);
        }

        let (watcher, _) = watch::channel(snapshot.clone());
        Self {
            path,
            recent_limit,
            state: Mutex::new(snapshot),
            watcher,
        }
    }

    /// Reads the committed snapshot without opening the store.
    pub async fn read(path: &Path) -> Result<Option<StatsSnapshot>> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::StoreCorruption(format!("{}: {}", path.display(), e)));
            }
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| Error::StoreCorruption(format!("{}: {}", path.display(), e)))
    }

    pub async fn record_submitted(&self, request: &FetchRequest) -> Result<()> {
        self.update(|snapshot| snapshot.apply_submitted(request))
            .await
    }

    pub async fn record_outcome(&self, result: &FetchResult) -> Result<()> {
        let limit = self.recent_limit;
        self.update(|snapshot| snapshot.apply_outcome(result, limit))
            .await
    }

    /// Applies `delta` and commits it. On a failed write nothing changes.
    pub async fn update<F>(&self, delta: F) -> Result<()>
    where
        F: FnOnce(&mut StatsSnapshot),
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        delta(&mut next);

        self.persist(&next)
            .await
            .map_err(|e| Error::StoreWrite(format!("{}: {}", self.path.display(), e)))?;

        *state = next;
        self.watcher.send_replace(state.clone());
        Ok(())
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        self.state.lock().await.clone()
    }

    /// Receives every committed snapshot.
    pub fn watch(&self) -> watch::Receiver<StatsSnapshot> {
        self.watcher.subscribe()
    }

    async fn persist(&self, snapshot: &StatsSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp = temp_path(&self.path);
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("stats"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_sits_next_to_store() {
        assert_eq!(
            temp_path(Path::new("data/stats.json")),
            PathBuf::from("data/stats.json.tmp")
        );
    }
}
