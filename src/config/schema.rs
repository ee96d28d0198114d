use crate::fetch::PoolSettings;
use crate::limiter::RateLimitPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    #[serde(default = "default_hourly_cap")]
    #[validate(range(min = 1))]
    pub hourly_cap: u32,

    #[serde(default = "default_daily_cap")]
    #[validate(range(min = 1))]
    pub daily_cap: u32,

    #[serde(default = "default_min_delay")]
    pub min_delay_secs: u64,

    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 16))]
    pub concurrency: usize,

    #[serde(default = "default_fetch_timeout")]
    #[validate(range(min = 1))]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_dedupe_window")]
    pub dedupe_window_secs: u64,

    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_max_retry_wait")]
    pub max_retry_wait_secs: u64,

    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    #[serde(default = "default_stats_path")]
    pub stats_path: PathBuf,

    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default = "default_recent_limit")]
    pub recent_activity_limit: usize,

    #[serde(default = "default_true")]
    pub acknowledge: bool,

    #[serde(default = "default_user_agent")]
    #[validate(length(min = 1))]
    pub user_agent: String,

    #[serde(default)]
    pub observers: Vec<ObserverConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObserverConfig {
    Console,
    Json {
        path: String,
    },
    Csv {
        path: String,
    },
    Sqlite {
        path: String,
        #[serde(default = "default_table_name")]
        table: String,
    },
}

impl PipelineConfig {
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            hourly_cap: self.hourly_cap,
            daily_cap: self.daily_cap,
            min_delay: Duration::from_secs(self.min_delay_secs),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            concurrency: self.concurrency,
            queue_capacity: self.queue_capacity,
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            max_retry_wait: Duration::from_secs(self.max_retry_wait_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            download_dir: self.download_dir.clone(),
        }
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_secs(self.dedupe_window_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hourly_cap: default_hourly_cap(),
            daily_cap: default_daily_cap(),
            min_delay_secs: default_min_delay(),
            concurrency: default_concurrency(),
            fetch_timeout_secs: default_fetch_timeout(),
            dedupe_window_secs: default_dedupe_window(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            max_retry_wait_secs: default_max_retry_wait(),
            queue_capacity: default_queue_capacity(),
            stats_path: default_stats_path(),
            download_dir: default_download_dir(),
            recent_activity_limit: default_recent_limit(),
            acknowledge: true,
            user_agent: default_user_agent(),
            observers: Vec::new(),
        }
    }
}

fn default_hourly_cap() -> u32 {
    25
}

fn default_daily_cap() -> u32 {
    200
}

fn default_min_delay() -> u64 {
    12
}

fn default_concurrency() -> usize {
    2
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_dedupe_window() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_max_retry_wait() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    100
}

fn default_stats_path() -> PathBuf {
    PathBuf::from("data/stats.json")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_recent_limit() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    "reelbot/0.1".to_string()
}

fn default_table_name() -> String {
    "fetch_outcomes".to_string()
}
