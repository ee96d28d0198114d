use crate::error::{Error, Result};
use crate::extractor::MediaLink;
use crate::fetch::ArtifactMetadata;
use crate::limiter::DenyReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Pending,
    RateLimited,
    InProgress,
    Succeeded,
    Failed,
}

impl FetchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FetchStatus::Succeeded | FetchStatus::Failed | FetchStatus::RateLimited
        )
    }

    fn can_become(&self, next: FetchStatus) -> bool {
        use FetchStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, RateLimited)
                | (Pending, Failed)
                | (InProgress, Succeeded)
                | (InProgress, Failed)
        )
    }
}

/// Why a fetch ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    NotFound,
    AuthRequired,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Succeeded(ArtifactMetadata),
    Failed {
        kind: FailureKind,
    },
    RateLimited {
        reason: DenyReason,
        #[serde(with = "duration_secs")]
        retry_after: Duration,
    },
}

impl FetchOutcome {
    pub fn status(&self) -> FetchStatus {
        match self {
            FetchOutcome::Succeeded(_) => FetchStatus::Succeeded,
            FetchOutcome::Failed { .. } => FetchStatus::Failed,
            FetchOutcome::RateLimited { .. } => FetchStatus::RateLimited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub id: Uuid,
    pub link: MediaLink,
    pub user_id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    status: FetchStatus,
    pub attempts: u32,
}

impl FetchRequest {
    pub fn new(
        link: MediaLink,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        guild_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            link,
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            guild_id,
            submitted_at: Utc::now(),
            status: FetchStatus::Pending,
            attempts: 0,
        }
    }

    pub fn status(&self) -> FetchStatus {
        self.status
    }

    /// Moves the request along its lifecycle; terminal states never change.
    pub fn transition(&mut self, next: FetchStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// A request in its terminal state together with the detail of how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub request: FetchRequest,
    pub outcome: FetchOutcome,
}

impl FetchResult {
    /// Applies the outcome's status to the request.
    pub fn finish(mut request: FetchRequest, outcome: FetchOutcome) -> Result<Self> {
        request.transition(outcome.status())?;
        Ok(Self { request, outcome })
    }

    /// Terminal failure for a request whose worker went away without answering.
    pub(crate) fn abandoned(mut request: FetchRequest) -> Self {
        request.status = FetchStatus::Failed;
        Self {
            request,
            outcome: FetchOutcome::Failed {
                kind: FailureKind::Unknown,
            },
        }
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
