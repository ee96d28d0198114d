use super::OutcomeObserver;
use crate::error::Result;
use crate::request::FetchResult;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// In-process push channel for dashboards and other live listeners.
pub struct BroadcastObserver {
    tx: broadcast::Sender<FetchResult>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchResult> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl OutcomeObserver for BroadcastObserver {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn on_outcome(&self, result: &FetchResult) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.tx.send(result.clone());
        Ok(())
    }
}
