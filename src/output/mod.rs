use crate::error::Result;
use crate::request::FetchResult;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

pub mod broadcast;
pub mod console;
pub mod csv;
pub mod json;
pub mod sqlite;

/// Receives every request that reached a terminal state.
#[async_trait]
pub trait OutcomeObserver: Send + Sync {
    fn name(&self) -> &str;
    async fn on_outcome(&self, result: &FetchResult) -> Result<()>;
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Fans an outcome out to every registered observer.
///
/// Observers run concurrently, each under its own timeout; a failing or
/// stalled observer is logged and never affects the others.
pub struct ObserverSet {
    observers: Vec<Arc<dyn OutcomeObserver>>,
    timeout: Duration,
}

impl ObserverSet {
    pub fn new(timeout: Duration) -> Self {
        Self {
            observers: Vec::new(),
            timeout,
        }
    }

    pub fn register(&mut self, observer: Arc<dyn OutcomeObserver>) {
        log::debug!("Registered observer {}", observer.name());
        self.observers.push(observer);
    }

    pub async fn notify(&self, result: &FetchResult) {
        join_all(self.observers.iter().map(|observer| async move {
            match tokio::time::timeout(self.timeout, observer.on_outcome(result)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Observer {} failed: {}", observer.name(), e),
                Err(_) => log::warn!(
                    "Observer {} timed out after {:?}",
                    observer.name(),
                    self.timeout
                ),
            }
        }))
        .await;
    }

    pub async fn close(&self) {
        for observer in &self.observers {
            if let Err(e) = observer.close().await {
                log::warn!("Closing observer {} failed: {}", observer.name(), e);
            }
        }
    }
}

impl Default for ObserverSet {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
