use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AcmeError, Identifier};
use crate::domain::{AccountId, AuthorizationId, CertificateId, OrderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub account_id: AccountId,
    pub provisioner_id: String,
    pub status: OrderStatus,
    /// Normalized and sorted
    pub identifiers: Vec<Identifier>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub authorization_ids: Vec<AuthorizationId>,
    pub certificate_id: Option<CertificateId>,
    pub error: Option<AcmeError>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
