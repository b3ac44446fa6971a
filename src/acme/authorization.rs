use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Identifier;
use crate::domain::{AccountId, AuthorizationId, ChallengeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
        }
    }

    /// Statuses that make any order containing the authorization invalid.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Invalid | Self::Deactivated | Self::Expired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub id: AuthorizationId,
    pub account_id: AccountId,
    /// For wildcard orders the value has the `*.` prefix stripped
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub challenge_ids: Vec<ChallengeId>,
    #[serde(default)]
    pub wildcard: bool,
    pub expires_at: DateTime<Utc>,
}

impl Authorization {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
