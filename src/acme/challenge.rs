use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::AcmeError;
use crate::domain::{AccountId, AuthorizationId, ChallengeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: ChallengeId,
    pub authorization_id: AuthorizationId,
    pub account_id: AccountId,
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub token: String,
    pub status: ChallengeStatus,
    #[serde(default)]
    pub retry_count: u32,
    pub validated_at: Option<DateTime<Utc>>,
    pub error: Option<AcmeError>,
}

impl Challenge {
    pub fn new(
        authorization_id: AuthorizationId,
        account_id: AccountId,
        challenge_type: ChallengeType,
    ) -> Self {
        Self {
            id: ChallengeId::new(),
            authorization_id,
            account_id,
            challenge_type,
            token: new_token(),
            status: ChallengeStatus::Pending,
            retry_count: 0,
            validated_at: None,
            error: None,
        }
    }
}

/// 128 bits of entropy, base64url without padding.
pub fn new_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
