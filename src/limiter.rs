//! Global admission control for outbound fetches.
//!
//! Hourly and daily caps use fixed windows: a window opens with the first
//! admission after the previous one expired and lasts exactly one hour or
//! one day. Denied attempts never consume budget.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub hourly_cap: u32,
    pub daily_cap: u32,
    pub min_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    HourlyCapExceeded,
    DailyCapExceeded,
    MinDelayNotElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied {
        reason: DenyReason,
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateBudget {
    pub hourly_count: u32,
    pub hourly_window_start: Option<Instant>,
    pub daily_count: u32,
    pub daily_window_start: Option<Instant>,
    pub last_request: Option<Instant>,
}

impl RateBudget {
    fn roll_windows(&mut self, now: Instant) {
        if expired(self.hourly_window_start, HOUR, now) {
            self.hourly_count = 0;
            self.hourly_window_start = None;
        }
        if expired(self.daily_window_start, DAY, now) {
            self.daily_count = 0;
            self.daily_window_start = None;
        }
    }
}

fn expired(start: Option<Instant>, window: Duration, now: Instant) -> bool {
    start.is_some_and(|s| now.saturating_duration_since(s) >= window)
}

fn remaining(start: Option<Instant>, span: Duration, now: Instant) -> Duration {
    start
        .map(|s| (s + span).saturating_duration_since(now))
        .unwrap_or_default()
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    budget: Mutex<RateBudget>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            budget: Mutex::new(RateBudget::default()),
        }
    }

    pub fn try_admit(&self) -> Admission {
        self.try_admit_at(Instant::now())
    }

    /// Never blocks beyond the budget lock; callers decide whether to retry.
    pub fn try_admit_at(&self, now: Instant) -> Admission {
        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        budget.roll_windows(now);

        let denied = if budget.daily_count >= self.policy.daily_cap {
            Some((
                DenyReason::DailyCapExceeded,
                remaining(budget.daily_window_start, DAY, now),
            ))
        } else if budget.hourly_count >= self.policy.hourly_cap {
            Some((
                DenyReason::HourlyCapExceeded,
                remaining(budget.hourly_window_start, HOUR, now),
            ))
        } else {
            budget
                .last_request
                .filter(|last| now.saturating_duration_since(*last) < self.policy.min_delay)
                .map(|last| {
                    (
                        DenyReason::MinDelayNotElapsed,
                        remaining(Some(last), self.policy.min_delay, now),
                    )
                })
        };

        if let Some((reason, retry_after)) = denied {
            log::debug!("Admission denied: {:?}, retry after {:?}", reason, retry_after);
            return Admission::Denied {
                reason,
                retry_after,
            };
        }

        budget.hourly_window_start.get_or_insert(now);
        budget.daily_window_start.get_or_insert(now);
        budget.hourly_count += 1;
        budget.daily_count += 1;
        budget.last_request = Some(now);

        Admission::Admitted
    }

    pub fn budget(&self) -> RateBudget {
        *self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
