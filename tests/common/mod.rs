#![allow(dead_code)]

use async_trait::async_trait;
use reelbot::chat::{ChatEvent, ChatReplier};
use reelbot::coordinator::{Pipeline, PipelineSettings};
use reelbot::fetch::{ArtifactMetadata, FetchError, Fetcher, PoolSettings, WorkerPool};
use reelbot::limiter::{RateLimitPolicy, RateLimiter};
use reelbot::output::{ObserverSet, OutcomeObserver};
use reelbot::request::{FailureKind, FetchResult};
use reelbot::stats::StatsStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// How the scripted fetcher answers for one shortcode.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed { bytes: u64, after: Duration },
    Fail(FailureKind),
    Hang,
}

/// Answers fetches from a per-shortcode script and records the call order.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, shortcode: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(shortcode.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn shortcode(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.nth(1))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        _timeout: Duration,
    ) -> Result<ArtifactMetadata, FetchError> {
        let code = shortcode(url);
        self.calls.lock().unwrap().push(code.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&code)
            .cloned()
            .unwrap_or(Script::Succeed {
                bytes: 1024,
                after: Duration::ZERO,
            });

        match script {
            Script::Succeed { bytes, after } => {
                tokio::time::sleep(after).await;
                Ok(ArtifactMetadata {
                    path: destination.with_extension("mp4"),
                    bytes,
                    content_type: Some("video/mp4".to_string()),
                })
            }
            Script::Fail(FailureKind::NotFound) => Err(FetchError::NotFound(url.to_string())),
            Script::Fail(FailureKind::AuthRequired) => {
                Err(FetchError::AuthRequired(url.to_string()))
            }
            Script::Fail(_) => Err(FetchError::Unknown("scripted failure".to_string())),
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Collects every reply instead of sending it.
#[derive(Default)]
pub struct RecordingChat {
    replies: Mutex<Vec<(String, String)>>,
}

impl RecordingChat {
    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }

    /// Replies that report an outcome, excluding acknowledgements.
    pub fn outcome_replies(&self) -> Vec<String> {
        self.replies()
            .into_iter()
            .map(|(_, text)| text)
            .filter(|text| !text.starts_with("🔄"))
            .collect()
    }
}

#[async_trait]
impl ChatReplier for RecordingChat {
    async fn reply(&self, channel_id: &str, text: &str) -> reelbot::Result<()> {
        self.replies
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverMode {
    Record,
    Fail,
    Stall,
}

pub struct RecordingObserver {
    name: String,
    mode: ObserverMode,
    seen: Mutex<Vec<FetchResult>>,
}

impl RecordingObserver {
    pub fn new(name: &str, mode: ObserverMode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<FetchResult> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutcomeObserver for RecordingObserver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_outcome(&self, result: &FetchResult) -> reelbot::Result<()> {
        match self.mode {
            ObserverMode::Record => {
                self.seen.lock().unwrap().push(result.clone());
                Ok(())
            }
            ObserverMode::Fail => Err(reelbot::Error::Internal("observer exploded".to_string())),
            ObserverMode::Stall => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

pub fn event(user: &str, content: &str) -> ChatEvent {
    ChatEvent {
        author_id: user.to_string(),
        author_is_bot: false,
        channel_id: "general".to_string(),
        guild_id: Some("guild-1".to_string()),
        content: content.to_string(),
    }
}

pub fn open_policy() -> RateLimitPolicy {
    RateLimitPolicy {
        hourly_cap: 1000,
        daily_cap: 1000,
        min_delay: Duration::ZERO,
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub fetcher: Arc<ScriptedFetcher>,
    pub chat: Arc<RecordingChat>,
    pub store: Arc<StatsStore>,
}

pub struct HarnessBuilder {
    pub policy: RateLimitPolicy,
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub fetch_timeout: Duration,
    pub dedupe_window: Duration,
    pub acknowledge: bool,
    pub observers: ObserverSet,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            policy: open_policy(),
            concurrency: 2,
            queue_capacity: 16,
            fetch_timeout: Duration::from_secs(5),
            dedupe_window: Duration::from_secs(60),
            acknowledge: true,
            observers: ObserverSet::new(Duration::from_millis(200)),
        }
    }
}

impl HarnessBuilder {
    pub async fn build(self, dir: &Path, fetcher: ScriptedFetcher) -> Harness {
        let fetcher = Arc::new(fetcher);
        let chat = Arc::new(RecordingChat::default());
        let store = Arc::new(StatsStore::open(dir.join("stats.json"), 50).await);
        let limiter = Arc::new(RateLimiter::new(self.policy));
        let pool = WorkerPool::new(
            PoolSettings {
                concurrency: self.concurrency,
                queue_capacity: self.queue_capacity,
                max_attempts: 3,
                backoff_base: Duration::from_millis(10),
                max_retry_wait: Duration::from_secs(1),
                fetch_timeout: self.fetch_timeout,
                download_dir: dir.join("downloads"),
            },
            limiter.clone(),
            fetcher.clone(),
        );

        let pipeline = Pipeline::new(
            PipelineSettings {
                dedupe_window: self.dedupe_window,
                acknowledge: self.acknowledge,
                reporter_idle: Duration::from_secs(30),
            },
            limiter,
            pool,
            store.clone(),
            self.observers,
            chat.clone(),
        );

        Harness {
            pipeline,
            fetcher,
            chat,
            store,
        }
    }
}
