use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// An ACME account, bound to the public key that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    /// Public JWK as received
    pub key: serde_json::Value,
    /// RFC 7638 thumbprint of `key`
    pub key_id: String,
    #[serde(default)]
    pub contact: Vec<String>,
    pub status: AccountStatus,
    #[serde(default)]
    pub terms_of_service_agreed: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_valid(&self) -> bool {
        self.status == AccountStatus::Valid
    }
}
