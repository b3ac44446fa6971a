//! # Provisioners
//!
//! A provisioner is an immutable, named authority configuration: how a
//! requester proves identity (a signed one-time token, a client certificate,
//! or an ACME account) and which constraints apply to certificates issued on
//! its behalf.

pub mod config;
pub mod extension;
pub mod registry;
pub mod token;

use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};

use crate::db::ProvisionerData;

pub use config::{ProvisionerConfig, TokenKeyConfig};
pub use extension::{ProvisionerExtension, PROVISIONER_EXTENSION_OID};
pub use registry::{ProvisionerIndex, ProvisionerPage, ProvisionerRegistry};
pub use token::{token_id, TokenClaims};

/// Provisioner families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisionerType {
    #[serde(rename = "JWK", alias = "jwk")]
    Jwk,
    #[serde(rename = "OIDC", alias = "oidc")]
    Oidc,
    #[serde(rename = "MTLS", alias = "mtls")]
    Mtls,
    #[serde(rename = "ACME", alias = "acme")]
    Acme,
}

impl ProvisionerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionerType::Jwk => "JWK",
            ProvisionerType::Oidc => "OIDC",
            ProvisionerType::Mtls => "MTLS",
            ProvisionerType::Acme => "ACME",
        }
    }

    /// Whether requests for this provisioner carry a signed token.
    pub fn uses_tokens(&self) -> bool {
        matches!(self, ProvisionerType::Jwk | ProvisionerType::Oidc)
    }
}

impl fmt::Display for ProvisionerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProvisionerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JWK" => Ok(ProvisionerType::Jwk),
            "OIDC" => Ok(ProvisionerType::Oidc),
            "MTLS" => Ok(ProvisionerType::Mtls),
            "ACME" => Ok(ProvisionerType::Acme),
            other => Err(format!("unknown provisioner type '{}'", other)),
        }
    }
}

/// Certificate lifetime constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerClaims {
    pub min_cert_duration_seconds: u64,
    pub max_cert_duration_seconds: u64,
    pub default_cert_duration_seconds: u64,
    /// Refuse renewal through a previously issued client certificate
    pub disable_renewal: bool,
}

impl Default for ProvisionerClaims {
    fn default() -> Self {
        Self {
            min_cert_duration_seconds: 5 * 60,
            max_cert_duration_seconds: 24 * 3600,
            default_cert_duration_seconds: 24 * 3600,
            disable_renewal: false,
        }
    }
}

impl ProvisionerClaims {
    pub fn min_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_cert_duration_seconds as i64)
    }

    pub fn max_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_cert_duration_seconds as i64)
    }

    pub fn default_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_cert_duration_seconds as i64)
    }

    pub(crate) fn check(&self) -> std::result::Result<(), String> {
        if self.min_cert_duration_seconds == 0 {
            return Err("min_cert_duration_seconds must be greater than 0".to_string());
        }
        if self.min_cert_duration_seconds > self.max_cert_duration_seconds {
            return Err("min_cert_duration_seconds exceeds max_cert_duration_seconds".to_string());
        }
        if self.default_cert_duration_seconds < self.min_cert_duration_seconds
            || self.default_cert_duration_seconds > self.max_cert_duration_seconds
        {
            return Err("default_cert_duration_seconds is outside the min/max bounds".to_string());
        }
        Ok(())
    }
}

/// Names a provisioner may issue for. Empty lists place no restriction.
///
/// DNS patterns are exact names or `*.domain`, where the wildcard stands for
/// exactly one label. IP SANs are not restricted by policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamePolicy {
    pub allowed_dns: Vec<String>,
    pub allowed_email_domains: Vec<String>,
}

impl NamePolicy {
    pub fn is_empty(&self) -> bool {
        self.allowed_dns.is_empty() && self.allowed_email_domains.is_empty()
    }

    pub fn allows_dns(&self, name: &str) -> bool {
        if self.allowed_dns.is_empty() {
            return true;
        }
        let name = name.to_ascii_lowercase();
        self.allowed_dns.iter().any(|pattern| dns_matches(&pattern.to_ascii_lowercase(), &name))
    }

    pub fn allows_email(&self, email: &str) -> bool {
        if self.allowed_email_domains.is_empty() {
            return true;
        }
        match email.rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() => self
                .allowed_email_domains
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(domain)),
            _ => false,
        }
    }
}

fn dns_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            if name == pattern {
                return true;
            }
            match name.split_once('.') {
                Some((label, rest)) => !label.is_empty() && label != "*" && rest == suffix,
                None => false,
            }
        }
        None => pattern == name,
    }
}

/// A key that verifies tokens for a JWK or OIDC provisioner.
#[derive(Clone)]
pub struct TokenKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub decoding_key: DecodingKey,
}

impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// A loaded provisioner. Immutable once built; shared through `Arc`.
#[derive(Debug, Clone)]
pub struct Provisioner {
    pub id: String,
    pub name: String,
    pub provisioner_type: ProvisionerType,
    pub keys: Vec<TokenKey>,
    /// Trust anchors (DER) for client certificates of an MTLS provisioner
    pub roots: Vec<Vec<u8>>,
    /// Expected `iss` for OIDC tokens
    pub issuer: Option<String>,
    pub claims: ProvisionerClaims,
    pub policy: NamePolicy,
    pub min_rsa_key_bits: usize,
}

impl Provisioner {
    /// Issuer a token for this provisioner must carry.
    pub fn expected_issuer(&self) -> &str {
        match (self.provisioner_type, self.issuer.as_deref()) {
            (ProvisionerType::Oidc, Some(issuer)) => issuer,
            _ => &self.name,
        }
    }

    /// Candidate verification keys, narrowed by the token header `kid`.
    pub fn keys_for(&self, kid: Option<&str>) -> Vec<&TokenKey> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .filter(|k| k.kid == kid || format!("{}:{}", self.name, k.kid) == kid)
                .collect(),
            None => self.keys.iter().collect(),
        }
    }

    pub fn data(&self) -> ProvisionerData {
        ProvisionerData {
            id: self.id.clone(),
            name: self.name.clone(),
            provisioner_type: self.provisioner_type.as_str().to_string(),
        }
    }
}
