//! Seam to the component that actually proves control of an identifier
//! (HTTP fetch, DNS lookup, TLS-ALPN handshake).

use async_trait::async_trait;

use super::{AcmeError, Challenge, Identifier};

/// Everything a validator needs for one attempt.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub challenge: Challenge,
    pub identifier: Identifier,
    /// `token || '.' || thumbprint(account key)`
    pub key_authorization: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid(AcmeError),
}

#[async_trait]
pub trait ChallengeValidator: Send + Sync + std::fmt::Debug {
    async fn validate(&self, request: &ValidationRequest) -> ValidationOutcome;
}

/// Reports the same outcome for every challenge. Backs dev mode, where every
/// challenge is accepted, and deployments without a validator, where none is.
#[derive(Debug, Clone)]
pub struct StaticValidator {
    outcome: ValidationOutcome,
}

impl StaticValidator {
    pub fn accept_all() -> Self {
        Self { outcome: ValidationOutcome::Valid }
    }

    pub fn reject_all(detail: impl Into<String>) -> Self {
        Self { outcome: ValidationOutcome::Invalid(AcmeError::connection(detail)) }
    }
}

#[async_trait]
impl ChallengeValidator for StaticValidator {
    async fn validate(&self, _request: &ValidationRequest) -> ValidationOutcome {
        self.outcome.clone()
    }
}
