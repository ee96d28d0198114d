use crate::chat::{self, ChatEvent, ChatReplier};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::extractor::extract_links;
use crate::fetch::{Fetcher, PendingFetch, ShutdownMode, WorkerPool};
use crate::limiter::{RateBudget, RateLimiter};
use crate::output::ObserverSet;
use crate::request::{FailureKind, FetchOutcome, FetchRequest, FetchResult};
use crate::stats::{StatsSnapshot, StatsStore};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub dedupe_window: Duration,
    pub acknowledge: bool,
    /// How long a requester's reporter waits for more work before exiting.
    pub reporter_idle: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            dedupe_window: config.dedupe_window(),
            acknowledge: config.acknowledge,
            reporter_idle: Duration::from_secs(300),
        }
    }
}

/// Turns a terminal result into a store write, observer fan-out and chat reply.
struct Reporter {
    store: Arc<StatsStore>,
    observers: Arc<ObserverSet>,
    chat: Arc<dyn ChatReplier>,
}

impl Reporter {
    async fn run(
        self: Arc<Self>,
        previous: Option<JoinHandle<()>>,
        mut rx: mpsc::UnboundedReceiver<PendingFetch>,
        idle: Duration,
    ) {
        // Outcomes for one requester are reported strictly in submission order.
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        loop {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Some(pending)) => self.report(pending.await).await,
                Ok(None) => break,
                Err(_) => {
                    rx.close();
                    while let Some(pending) = rx.recv().await {
                        self.report(pending.await).await;
                    }
                    break;
                }
            }
        }
    }

    async fn report(&self, result: FetchResult) {
        if let Err(e) = self.store.record_outcome(&result).await {
            log::warn!("Outcome of {} not recorded: {}", result.request.id, e);
        }

        self.observers.notify(&result).await;

        let text = chat::outcome_message(&result);
        if let Err(e) = self.chat.reply(&result.request.channel_id, &text).await {
            log::warn!("Reply to #{} failed: {}", result.request.channel_id, e);
        }
    }
}

struct ReporterSlot {
    tx: mpsc::UnboundedSender<PendingFetch>,
    handle: JoinHandle<()>,
}

pub struct Pipeline {
    settings: PipelineSettings,
    limiter: Arc<RateLimiter>,
    pool: WorkerPool,
    store: Arc<StatsStore>,
    reporter: Arc<Reporter>,
    recent: Mutex<HashMap<(String, Url), Instant>>,
    reporters: Mutex<HashMap<String, ReporterSlot>>,
    state: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        limiter: Arc<RateLimiter>,
        pool: WorkerPool,
        store: Arc<StatsStore>,
        observers: ObserverSet,
        chat: Arc<dyn ChatReplier>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Running);

        Self {
            settings,
            limiter,
            pool,
            store: store.clone(),
            reporter: Arc::new(Reporter {
                store,
                observers: Arc::new(observers),
                chat,
            }),
            recent: Mutex::new(HashMap::new()),
            reporters: Mutex::new(HashMap::new()),
            state,
        }
    }

    /// Wires every component from configuration.
    pub async fn from_config(
        config: &PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        observers: ObserverSet,
        chat: Arc<dyn ChatReplier>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_policy()));
        let pool = WorkerPool::new(config.pool_settings(), limiter.clone(), fetcher);
        let store = Arc::new(
            StatsStore::open(config.stats_path.clone(), config.recent_activity_limit).await,
        );

        Self::new(
            PipelineSettings::from_config(config),
            limiter,
            pool,
            store,
            observers,
            chat,
        )
    }

    /// Reads events until the stream ends (drain) or Ctrl-C arrives (cancel).
    pub async fn run<S>(&self, events: S)
    where
        S: Stream<Item = ChatEvent> + Unpin,
    {
        let mut events = events;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mode = loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    log::info!("Shutting down...");
                    break ShutdownMode::Cancel;
                }
                event = events.next() => match event {
                    Some(event) => {
                        // Ctrl-C stays live while a submission waits for queue room.
                        let handled = self.handle_event(event);
                        tokio::pin!(handled);
                        let mut interrupted = false;
                        let result = tokio::select! {
                            result = &mut handled => result,
                            _ = &mut ctrl_c => {
                                log::info!("Shutting down...");
                                interrupted = true;
                                self.pool.cancel();
                                handled.await
                            }
                        };
                        if let Err(e) = result {
                            log::error!("Error handling chat event: {}", e);
                        }
                        if interrupted {
                            break ShutdownMode::Cancel;
                        }
                    }
                    None => {
                        log::info!("Event stream ended, draining queued fetches");
                        break ShutdownMode::Drain;
                    }
                },
            }
        };

        self.shutdown(mode).await;
    }

    /// Returns the ids of the requests this event created.
    pub async fn handle_event(&self, event: ChatEvent) -> Result<Vec<Uuid>> {
        if *self.state.borrow() != PipelineState::Running {
            return Err(Error::Shutdown);
        }
        if event.author_is_bot {
            return Ok(Vec::new());
        }

        let links = extract_links(&event.content);
        if links.is_empty() {
            return Ok(Vec::new());
        }
        log::info!(
            "Instagram link(s) detected from {}: {}",
            event.author_id,
            event.content
        );

        let mut requests = Vec::new();
        {
            let mut recent = self.recent.lock().await;
            let now = Instant::now();
            let window = self.settings.dedupe_window;
            recent.retain(|_, seen| now.saturating_duration_since(*seen) < window);

            for link in links {
                let key = (event.author_id.clone(), link.url.clone());
                if recent.contains_key(&key) {
                    log::debug!("Dropping repeated {} from {}", link, event.author_id);
                    continue;
                }
                recent.insert(key, now);
                requests.push(FetchRequest::new(
                    link,
                    event.author_id.as_str(),
                    event.channel_id.as_str(),
                    event.guild_id.clone(),
                ));
            }
        }

        if requests.is_empty() {
            return Ok(Vec::new());
        }

        if self.settings.acknowledge {
            let text = chat::acknowledgement(requests.len());
            if let Err(e) = self.reporter.chat.reply(&event.channel_id, &text).await {
                log::warn!("Acknowledgement to #{} failed: {}", event.channel_id, e);
            }
        }

        let mut accepted = Vec::with_capacity(requests.len());
        for request in requests {
            if let Err(e) = self.store.record_submitted(&request).await {
                log::warn!("Submission of {} not recorded: {}", request.id, e);
            }

            let id = request.id;
            match self.pool.submit(request.clone()).await {
                Ok(pending) => {
                    accepted.push(id);
                    self.enqueue_report(&event.author_id, pending).await;
                }
                Err(e) => {
                    log::warn!("Request {} was not queued: {}", id, e);
                    let cancelled = FetchResult::finish(
                        request,
                        FetchOutcome::Failed {
                            kind: FailureKind::Cancelled,
                        },
                    )?;
                    self.reporter.report(cancelled).await;
                }
            }
        }

        Ok(accepted)
    }

    async fn enqueue_report(&self, user_id: &str, pending: PendingFetch) {
        let mut reporters = self.reporters.lock().await;

        let pending = match reporters.get(user_id) {
            Some(slot) => match slot.tx.send(pending) {
                Ok(()) => return,
                Err(mpsc::error::SendError(pending)) => pending,
            },
            None => pending,
        };

        let previous = reporters.remove(user_id).map(|slot| slot.handle);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(pending);
        let handle = tokio::spawn(self.reporter.clone().run(
            previous,
            rx,
            self.settings.reporter_idle,
        ));
        reporters.insert(user_id.to_string(), ReporterSlot { tx, handle });

        reporters.retain(|_, slot| !(slot.handle.is_finished() && slot.tx.is_closed()));
    }

    /// Stops intake, settles every accepted request, then closes observers.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.state.send_replace(PipelineState::Draining);
        self.pool.shutdown(mode).await;

        let reporters = std::mem::take(&mut *self.reporters.lock().await);
        for (user_id, slot) in reporters {
            drop(slot.tx);
            if let Err(e) = slot.handle.await {
                log::error!("Reporter for {} panicked: {}", user_id, e);
            }
        }

        self.reporter.observers.close().await;
        self.state.send_replace(PipelineState::Stopped);
        log::info!("Pipeline stopped");
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.store.snapshot().await
    }

    pub fn watch_stats(&self) -> watch::Receiver<StatsSnapshot> {
        self.store.watch()
    }

    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn rate_budget(&self) -> RateBudget {
        self.limiter.budget()
    }
}
