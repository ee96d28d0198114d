use crate::request::{FailureKind, FetchOutcome, FetchRequest, FetchResult, FetchStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityEntry {
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rate_limited: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

impl ActivityEntry {
    fn count(&mut self, status: FetchStatus) {
        match status {
            FetchStatus::Succeeded => self.succeeded += 1,
            FetchStatus::Failed => self.failed += 1,
            FetchStatus::RateLimited => self.rate_limited += 1,
            FetchStatus::Pending | FetchStatus::InProgress => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub request_id: Uuid,
    pub url: String,
    pub user_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub status: FetchStatus,
    #[serde(default)]
    pub failure: Option<FailureKind>,
    pub at: DateTime<Utc>,
}

/// Persisted counters. Field aliases accept the legacy stats file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    #[serde(alias = "total_downloads")]
    pub total: u64,
    #[serde(alias = "successful_downloads")]
    pub succeeded: u64,
    #[serde(alias = "failed_downloads")]
    pub failed: u64,
    pub rate_limited: u64,
    pub pending: u64,
    pub user_activity: BTreeMap<String, ActivityEntry>,
    pub guild_activity: BTreeMap<String, ActivityEntry>,
    pub recent: VecDeque<ActivityRecord>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    /// `total` always equals the terminal counters plus requests still in flight.
    pub fn is_consistent(&self) -> bool {
        self.total == self.succeeded + self.failed + self.rate_limited + self.pending
    }

    pub fn success_rate(&self) -> f64 {
        let finished = self.succeeded + self.failed + self.rate_limited;
        if finished > 0 {
            (self.succeeded as f64 / finished as f64) * 100.0
        } else {
            0.0
        }
    }

    pub(crate) fn apply_submitted(&mut self, request: &FetchRequest) {
        self.total += 1;
        self.pending += 1;

        let now = Utc::now();
        let user = self.user_activity.entry(request.user_id.clone()).or_default();
        user.requests += 1;
        user.last_seen = Some(now);

        if let Some(guild_id) = &request.guild_id {
            let guild = self.guild_activity.entry(guild_id.clone()).or_default();
            guild.requests += 1;
            guild.last_seen = Some(now);
        }
        self.updated_at = Some(now);
    }

    pub(crate) fn apply_outcome(&mut self, result: &FetchResult, recent_limit: usize) {
        let status = result.request.status();
        if !status.is_terminal() {
            log::warn!(
                "Ignoring non-terminal outcome for request {}",
                result.request.id
            );
            return;
        }

        // The submission may not have been recorded if that write failed.
        if self.pending > 0 {
            self.pending -= 1;
        } else {
            self.total += 1;
        }

        match status {
            FetchStatus::Succeeded => self.succeeded += 1,
            FetchStatus::Failed => self.failed += 1,
            FetchStatus::RateLimited => self.rate_limited += 1,
            FetchStatus::Pending | FetchStatus::InProgress => {}
        }

        let now = Utc::now();
        self.user_activity
            .entry(result.request.user_id.clone())
            .or_default()
            .count(status);
        if let Some(guild_id) = &result.request.guild_id {
            self.guild_activity
                .entry(guild_id.clone())
                .or_default()
                .count(status);
        }

        let failure = match &result.outcome {
            FetchOutcome::Failed { kind } => Some(*kind),
            _ => None,
        };
        self.recent.push_back(ActivityRecord {
            request_id: result.request.id,
            url: result.request.link.url.to_string(),
            user_id: result.request.user_id.clone(),
            guild_id: result.request.guild_id.clone(),
            status,
            failure,
            at: now,
        });
        while self.recent.len() > recent_limit {
            self.recent.pop_front();
        }
        self.updated_at = Some(now);
    }

    /// Requests that were in flight when the previous process stopped are forgotten.
    pub(crate) fn drop_stale_pending(&mut self) -> u64 {
        let stale = self.pending;
        self.total = self.total.saturating_sub(stale);
        self.pending = 0;
        stale
    }
}
