//! # ACME Resource State Machine
//!
//! Accounts, orders, authorizations and challenges as described by RFC 8555,
//! with every state transition committed through the store's
//! compare-and-swap primitive. Request authentication (JWS) happens before
//! these operations are called: they receive an already-verified JWK or
//! account and the decoded payload.
//!
//! ```text
//! Account        valid ──deactivate──▶ deactivated
//! Order          pending ──▶ ready ──finalize──▶ processing ──▶ valid
//!                   └──────────┴────────────────────┴──────────▶ invalid
//! Authorization  pending ──▶ valid ──deactivate──▶ deactivated
//!                   ├──▶ invalid
//!                   └──▶ expired (on read)
//! Challenge      pending ──▶ processing ──▶ valid | invalid
//!                               └──(retry)──▶ pending
//! ```

pub mod account;
pub mod authorization;
pub mod certificate;
pub mod challenge;
pub mod db;
pub mod error;
pub mod jwk;
pub mod order;
pub mod request;
pub mod service;
pub mod validation;

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

pub use account::{Account, AccountStatus};
pub use authorization::{Authorization, AuthorizationStatus};
pub use certificate::AcmeCertificate;
pub use challenge::{Challenge, ChallengeStatus, ChallengeType};
pub use db::AcmeDb;
pub use error::{AcmeError, AcmeResult, ProblemType};
pub use order::{Order, OrderStatus};
pub use request::Payload;
pub use service::{AcmeService, NewAccountOutcome};
pub use validation::{ChallengeValidator, ValidationOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierType {
    Dns,
    Ip,
}

/// A name an order asks to be certified.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub identifier_type: IdentifierType,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Self { identifier_type: IdentifierType::Dns, value: value.into() }
    }

    pub fn ip(value: impl Into<String>) -> Self {
        Self { identifier_type: IdentifierType::Ip, value: value.into() }
    }

    pub fn is_wildcard(&self) -> bool {
        self.identifier_type == IdentifierType::Dns && self.value.starts_with("*.")
    }

    /// Lowercased DNS names and canonical IP text, so identifier sets compare
    /// equal regardless of how clients spelled them.
    pub fn normalized(&self) -> AcmeResult<Self> {
        match self.identifier_type {
            IdentifierType::Dns => {
                let value = self.value.trim_end_matches('.').to_ascii_lowercase();
                let bare = value.strip_prefix("*.").unwrap_or(&value);
                if bare.is_empty()
                    || bare.contains('*')
                    || bare.split('.').any(|label| label.is_empty())
                {
                    return Err(AcmeError::rejected_identifier(format!(
                        "'{}' is not a valid DNS identifier",
                        self.value
                    )));
                }
                Ok(Self::dns(value))
            }
            IdentifierType::Ip => {
                let ip: IpAddr = self.value.parse().map_err(|_| {
                    AcmeError::rejected_identifier(format!(
                        "'{}' is not a valid IP identifier",
                        self.value
                    ))
                })?;
                Ok(Self::ip(ip.to_string()))
            }
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.identifier_type {
            IdentifierType::Dns => write!(f, "dns:{}", self.value),
            IdentifierType::Ip => write!(f, "ip:{}", self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_normalize() {
        assert_eq!(Identifier::dns("Example.COM.").normalized().unwrap().value, "example.com");
        assert_eq!(Identifier::ip("::0001").normalized().unwrap().value, "::1");
        assert!(Identifier::dns("*.example.com").normalized().unwrap().is_wildcard());
        assert!(Identifier::dns("a.*.example.com").normalized().is_err());
        assert!(Identifier::dns("a..example.com").normalized().is_err());
        assert!(Identifier::ip("10.0.0.300").normalized().is_err());
        assert!(!Identifier::ip("10.0.0.1").is_wildcard());
    }

    #[test]
    fn identifier_json_shape() {
        let json = serde_json::to_value(Identifier::dns("example.com")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "dns", "value": "example.com"}));
        assert_eq!(Identifier::ip("10.0.0.1").to_string(), "ip:10.0.0.1");
    }
}
