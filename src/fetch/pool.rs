use super::{FetchError, Fetcher};
use crate::error::{Error, Result};
use crate::limiter::{Admission, RateLimiter};
use crate::request::{FailureKind, FetchOutcome, FetchRequest, FetchResult, FetchStatus};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Denials asking for a longer wait than this end the request immediately.
    pub max_retry_wait: Duration,
    pub fetch_timeout: Duration,
    pub download_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Finish every queued job, then stop.
    Drain,
    /// Fail queued and backing-off jobs with `Cancelled`; running fetches finish.
    Cancel,
}

struct Job {
    request: FetchRequest,
    reply: oneshot::Sender<FetchResult>,
}

/// Resolves once a worker has taken the request to a terminal state.
pub struct PendingFetch {
    request: FetchRequest,
    rx: oneshot::Receiver<FetchResult>,
}

impl Future for PendingFetch {
    type Output = FetchResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<FetchResult> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                log::error!("Worker dropped request {} without a result", this.request.id);
                Poll::Ready(FetchResult::abandoned(this.request.clone()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Worker {
    limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn Fetcher>,
    settings: PoolSettings,
}

/// Fixed set of workers pulling from one FIFO queue.
pub struct WorkerPool {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    cancel: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        settings: PoolSettings,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (cancel_tx, _) = watch::channel(false);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        let concurrency = settings.concurrency.max(1);

        let worker = Arc::new(Worker {
            limiter,
            fetcher,
            settings,
        });

        let handles = (0..concurrency)
            .map(|id| {
                let worker = worker.clone();
                let jobs = jobs_rx.clone();
                let cancel = cancel_tx.subscribe();
                tokio::spawn(async move { worker.run(id, jobs, cancel).await })
            })
            .collect();

        log::info!("Started {} fetch workers", concurrency);

        Self {
            jobs: Mutex::new(Some(jobs_tx)),
            cancel: cancel_tx,
            workers: Mutex::new(handles),
        }
    }

    /// Queues a pending request. Waits for room when the queue is full,
    /// unless the pool is cancelled meanwhile.
    pub async fn submit(&self, request: FetchRequest) -> Result<PendingFetch> {
        let sender = self.jobs.lock().await.clone().ok_or(Error::Shutdown)?;
        let mut cancel = self.cancel.subscribe();
        let (reply, rx) = oneshot::channel();
        let job = Job {
            request: request.clone(),
            reply,
        };

        tokio::select! {
            biased;
            _ = cancel.wait_for(|c| *c) => return Err(Error::Shutdown),
            sent = sender.send(job) => sent.map_err(|_| Error::Shutdown)?,
        }

        Ok(PendingFetch { request, rx })
    }

    /// Flags cancellation without waiting: blocked submissions give up,
    /// backing-off and queued jobs fail with `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.jobs.lock().await.take();
        if mode == ShutdownMode::Cancel {
            self.cancel();
        }

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Fetch worker panicked: {}", e);
            }
        }
        log::info!("Fetch workers stopped ({:?})", mode);
    }
}

impl Worker {
    async fn run(
        &self,
        id: usize,
        jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
        mut cancel: watch::Receiver<bool>,
    ) {
        loop {
            let job = { jobs.lock().await.recv().await };
            let Some(job) = job else { break };

            log::debug!("Worker {} took request {}", id, job.request.id);
            let result = self.process(job.request, &mut cancel).await;
            let _ = job.reply.send(result);
        }
        log::debug!("Worker {} finished", id);
    }

    async fn process(
        &self,
        mut request: FetchRequest,
        cancel: &mut watch::Receiver<bool>,
    ) -> FetchResult {
        loop {
            if *cancel.borrow() {
                return cancelled(request);
            }

            request.attempts += 1;
            let (reason, retry_after) = match self.limiter.try_admit() {
                Admission::Admitted => break,
                Admission::Denied {
                    reason,
                    retry_after,
                } => (reason, retry_after),
            };

            if request.attempts >= self.settings.max_attempts
                || retry_after > self.settings.max_retry_wait
            {
                log::warn!(
                    "Request {} rate limited after {} attempt(s): {:?}",
                    request.id,
                    request.attempts,
                    reason
                );
                return conclude(
                    request,
                    FetchOutcome::RateLimited {
                        reason,
                        retry_after,
                    },
                );
            }

            let wait = retry_after
                .max(self.backoff(request.attempts))
                .min(self.settings.max_retry_wait);
            log::debug!(
                "Request {} denied ({:?}), retrying in {:?}",
                request.id,
                reason,
                wait
            );

            tokio::select! {
                _ = sleep(wait) => {}
                _ = cancel.wait_for(|c| *c) => return cancelled(request),
            }
        }

        if let Err(e) = request.transition(FetchStatus::InProgress) {
            log::error!("Request {}: {}", request.id, e);
            return FetchResult::abandoned(request);
        }

        let timeout = self.settings.fetch_timeout;
        let destination = self
            .settings
            .download_dir
            .join(format!("{}-{}", request.link.shortcode, request.id));

        let fetched = tokio::time::timeout(
            timeout,
            self.fetcher.fetch(&request.link.url, &destination, timeout),
        )
        .await
        .unwrap_or(Err(FetchError::Timeout(timeout)));

        let outcome = match fetched {
            Ok(artifact) => {
                log::info!(
                    "Request {} stored {} ({} bytes)",
                    request.id,
                    artifact.path.display(),
                    artifact.bytes
                );
                FetchOutcome::Succeeded(artifact)
            }
            Err(e) => {
                let kind = if *cancel.borrow() {
                    FailureKind::Cancelled
                } else {
                    e.kind()
                };
                log::warn!("Request {} failed ({:?}): {}", request.id, kind, e);
                FetchOutcome::Failed { kind }
            }
        };

        conclude(request, outcome)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.settings.backoff_base.saturating_mul(factor)
    }
}

fn cancelled(request: FetchRequest) -> FetchResult {
    log::debug!("Request {} cancelled before fetching", request.id);
    conclude(
        request,
        FetchOutcome::Failed {
            kind: FailureKind::Cancelled,
        },
    )
}

fn conclude(request: FetchRequest, outcome: FetchOutcome) -> FetchResult {
    let fallback = request.clone();
    FetchResult::finish(request, outcome).unwrap_or_else(|e| {
        log::error!("Request {}: {}", fallback.id, e);
        FetchResult::abandoned(fallback)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::parse_link;
    use crate::fetch::ArtifactMetadata;
    use crate::limiter::{DenyReason, RateLimitPolicy};
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::time::Instant;
    use url::Url;

    struct StubFetcher {
        delay: Duration,
        calls: std::sync::Mutex<Vec<Instant>>,
    }

    impl StubFetcher {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(
            &self,
            _url: &Url,
            destination: &Path,
            _timeout: Duration,
        ) -> std::result::Result<ArtifactMetadata, FetchError> {
            self.calls.lock().unwrap().push(Instant::now());
            sleep(self.delay).await;
            Ok(ArtifactMetadata {
                path: destination.with_extension("mp4"),
                bytes: 42,
                content_type: Some("video/mp4".to_string()),
            })
        }
    }

    fn settings(concurrency: usize, max_attempts: u32) -> PoolSettings {
        PoolSettings {
            concurrency,
            queue_capacity: 16,
            max_attempts,
            backoff_base: Duration::from_secs(1),
            max_retry_wait: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(30),
            download_dir: PathBuf::from("downloads"),
        }
    }

    fn limiter(hourly: u32, delay_secs: u64) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimitPolicy {
            hourly_cap: hourly,
            daily_cap: 200,
            min_delay: Duration::from_secs(delay_secs),
        }))
    }

    fn request(code: &str) -> FetchRequest {
        let link = parse_link(&format!("https://www.instagram.com/reel/{code}/")).unwrap();
        FetchRequest::new(link, "user", "chan", None)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_min_delay_and_keeps_spacing() {
        let fetcher = StubFetcher::new(Duration::ZERO);
        let pool = WorkerPool::new(settings(2, 3), limiter(25, 12), fetcher.clone());

        let pending = vec![
            pool.submit(request("a")).await.unwrap(),
            pool.submit(request("b")).await.unwrap(),
            pool.submit(request("c")).await.unwrap(),
        ];
        for p in pending {
            let result = p.await;
            assert_eq!(result.request.status(), FetchStatus::Succeeded);
        }

        let calls = fetcher.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        let mut sorted = calls;
        sorted.sort();
        for pair in sorted.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_secs(12));
        }
        pool.shutdown(ShutdownMode::Drain).await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_end_rate_limited() {
        let pool = WorkerPool::new(
            settings(1, 1),
            limiter(25, 12),
            StubFetcher::new(Duration::ZERO),
        );

        let first = pool.submit(request("a")).await.unwrap();
        let second = pool.submit(request("b")).await.unwrap();
        assert_eq!(first.await.request.status(), FetchStatus::Succeeded);

        let result = second.await;
        assert_eq!(result.request.status(), FetchStatus::RateLimited);
        assert!(matches!(
            result.outcome,
            FetchOutcome::RateLimited {
                reason: DenyReason::MinDelayNotElapsed,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn long_waits_are_not_slept_through() {
        let pool = WorkerPool::new(
            settings(1, 3),
            limiter(1, 0),
            StubFetcher::new(Duration::ZERO),
        );

        assert_eq!(
            pool.submit(request("a")).await.unwrap().await.request.status(),
            FetchStatus::Succeeded
        );
        let started = Instant::now();
        let result = pool.submit(request("b")).await.unwrap().await;
        assert_eq!(result.request.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        match result.outcome {
            FetchOutcome::RateLimited {
                reason,
                retry_after,
            } => {
                assert_eq!(reason, DenyReason::HourlyCapExceeded);
                assert!(retry_after > Duration::from_secs(3500));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let pool = WorkerPool::new(
            settings(1, 3),
            limiter(25, 0),
            StubFetcher::new(Duration::from_secs(120)),
        );

        let result = pool.submit(request("slow")).await.unwrap().await;
        assert_eq!(result.request.status(), FetchStatus::Failed);
        assert_eq!(
            result.outcome,
            FetchOutcome::Failed {
                kind: FailureKind::Timeout
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_fails_waiting_requests() {
        let pool = WorkerPool::new(
            settings(1, 3),
            limiter(25, 30),
            StubFetcher::new(Duration::ZERO),
        );

        let first = pool.submit(request("a")).await.unwrap();
        let second = pool.submit(request("b")).await.unwrap();
        let third = pool.submit(request("c")).await.unwrap();
        assert_eq!(first.await.request.status(), FetchStatus::Succeeded);

        pool.shutdown(ShutdownMode::Cancel).await;

        for pending in [second, third] {
            let result = pending.await;
            assert_eq!(
                result.outcome,
                FetchOutcome::Failed {
                    kind: FailureKind::Cancelled
                }
            );
        }
        assert!(matches!(
            pool.submit(request("d")).await,
            Err(Error::Shutdown)
        ));
    }

    struct FailingFetcher {
        started: tokio::sync::Notify,
    }

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(
            &self,
            _url: &Url,
            _destination: &Path,
            _timeout: Duration,
        ) -> std::result::Result<ArtifactMetadata, FetchError> {
            self.started.notify_one();
            sleep(Duration::from_secs(10)).await;
            Err(FetchError::Unknown("connection reset".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn error_after_cancel_is_classified_cancelled() {
        let fetcher = Arc::new(FailingFetcher {
            started: tokio::sync::Notify::new(),
        });
        let pool = WorkerPool::new(settings(1, 3), limiter(25, 0), fetcher.clone());

        let pending = pool.submit(request("a")).await.unwrap();
        fetcher.started.notified().await;
        pool.shutdown(ShutdownMode::Cancel).await;

        let result = pending.await;
        assert_eq!(result.request.status(), FetchStatus::Failed);
        assert_eq!(
            result.outcome,
            FetchOutcome::Failed {
                kind: FailureKind::Cancelled
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn error_without_cancel_keeps_its_kind() {
        let fetcher = Arc::new(FailingFetcher {
            started: tokio::sync::Notify::new(),
        });
        let pool = WorkerPool::new(settings(1, 3), limiter(25, 0), fetcher);

        let result = pool.submit(request("a")).await.unwrap().await;
        assert_eq!(
            result.outcome,
            FetchOutcome::Failed {
                kind: FailureKind::Unknown
            }
        );
        pool.shutdown(ShutdownMode::Drain).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_releases_submit_blocked_on_full_queue() {
        let mut settings = settings(1, 3);
        settings.queue_capacity = 1;
        let pool = WorkerPool::new(settings, limiter(25, 0), StubFetcher::new(Duration::from_secs(25)));

        let running = pool.submit(request("a")).await.unwrap();
        let queued = pool.submit(request("b")).await.unwrap();

        let (blocked, ()) = tokio::join!(pool.submit(request("c")), async {
            sleep(Duration::from_secs(1)).await;
            pool.cancel();
        });
        assert!(matches!(blocked, Err(Error::Shutdown)));

        pool.shutdown(ShutdownMode::Cancel).await;
        assert_eq!(running.await.request.status(), FetchStatus::Succeeded);
        assert_eq!(
            queued.await.outcome,
            FetchOutcome::Failed {
                kind: FailureKind::Cancelled
            }
        );
    }
}
