use super::OutcomeObserver;
use crate::error::{Error, Result};
use crate::request::{FetchOutcome, FetchResult};
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::sync::Arc;

/// Prints one line per outcome, above any active progress bars.
pub struct ConsoleObserver {
    multi: Option<Arc<MultiProgress>>,
}

impl ConsoleObserver {
    pub fn new(multi: Option<Arc<MultiProgress>>) -> Self {
        Self { multi }
    }
}

pub(crate) fn summary(result: &FetchResult) -> String {
    let detail = match &result.outcome {
        FetchOutcome::Succeeded(artifact) => {
            format!("{} ({} bytes)", artifact.path.display(), artifact.bytes)
        }
        FetchOutcome::Failed { kind } => format!("{:?}", kind),
        FetchOutcome::RateLimited {
            reason,
            retry_after,
        } => format!("{:?}, retry in {}s", reason, retry_after.as_secs()),
    };
    format!(
        "[{:?}] {} from {} -> {}",
        result.request.status(),
        result.request.link,
        result.request.user_id,
        detail
    )
}

#[async_trait]
impl OutcomeObserver for ConsoleObserver {
    fn name(&self) -> &str {
        "console"
    }

    async fn on_outcome(&self, result: &FetchResult) -> Result<()> {
        let line = summary(result);
        match &self.multi {
            Some(multi) => multi
                .println(line)
                .map_err(|e| Error::Internal(e.to_string()))?,
            None => println!("{}", line),
        }
        Ok(())
    }
}
