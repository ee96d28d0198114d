pub mod chat;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod limiter;
pub mod output;
pub mod request;
pub mod stats;

pub use chat::{ChatEvent, ChatReplier, ConsoleChat};
pub use coordinator::{Pipeline, PipelineSettings, PipelineState};
pub use error::{Error, Result};
pub use extractor::{MediaKind, MediaLink, extract_links};
pub use fetch::{ArtifactMetadata, FetchError, Fetcher, HttpFetcher, ShutdownMode, WorkerPool};
pub use limiter::{Admission, DenyReason, RateBudget, RateLimitPolicy, RateLimiter};
pub use request::{FailureKind, FetchOutcome, FetchRequest, FetchResult, FetchStatus};
pub use stats::{StatsSnapshot, StatsStore};
