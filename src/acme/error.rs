//! RFC 8555 problem documents.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Identifier;
use crate::errors::{CertplaneError, ErrorKind};

pub type AcmeResult<T> = std::result::Result<T, AcmeError>;

/// ACME error types (`urn:ietf:params:acme:error:*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemType {
    #[serde(rename = "urn:ietf:params:acme:error:malformed")]
    Malformed,
    #[serde(rename = "urn:ietf:params:acme:error:unauthorized")]
    Unauthorized,
    #[serde(rename = "urn:ietf:params:acme:error:accountDoesNotExist")]
    AccountDoesNotExist,
    #[serde(rename = "urn:ietf:params:acme:error:alreadyRevoked")]
    AlreadyRevoked,
    #[serde(rename = "urn:ietf:params:acme:error:badCSR")]
    BadCsr,
    #[serde(rename = "urn:ietf:params:acme:error:badPublicKey")]
    BadPublicKey,
    #[serde(rename = "urn:ietf:params:acme:error:badRevocationReason")]
    BadRevocationReason,
    #[serde(rename = "urn:ietf:params:acme:error:orderNotReady")]
    OrderNotReady,
    #[serde(rename = "urn:ietf:params:acme:error:rejectedIdentifier")]
    RejectedIdentifier,
    #[serde(rename = "urn:ietf:params:acme:error:unsupportedIdentifier")]
    UnsupportedIdentifier,
    #[serde(rename = "urn:ietf:params:acme:error:incorrectResponse")]
    IncorrectResponse,
    #[serde(rename = "urn:ietf:params:acme:error:connection")]
    Connection,
    #[serde(rename = "urn:ietf:params:acme:error:serverInternal")]
    ServerInternal,
}

impl ProblemType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::Malformed => "urn:ietf:params:acme:error:malformed",
            Self::Unauthorized => "urn:ietf:params:acme:error:unauthorized",
            Self::AccountDoesNotExist => "urn:ietf:params:acme:error:accountDoesNotExist",
            Self::AlreadyRevoked => "urn:ietf:params:acme:error:alreadyRevoked",
            Self::BadCsr => "urn:ietf:params:acme:error:badCSR",
            Self::BadPublicKey => "urn:ietf:params:acme:error:badPublicKey",
            Self::BadRevocationReason => "urn:ietf:params:acme:error:badRevocationReason",
            Self::OrderNotReady => "urn:ietf:params:acme:error:orderNotReady",
            Self::RejectedIdentifier => "urn:ietf:params:acme:error:rejectedIdentifier",
            Self::UnsupportedIdentifier => "urn:ietf:params:acme:error:unsupportedIdentifier",
            Self::IncorrectResponse => "urn:ietf:params:acme:error:incorrectResponse",
            Self::Connection => "urn:ietf:params:acme:error:connection",
            Self::ServerInternal => "urn:ietf:params:acme:error:serverInternal",
        }
    }
}

/// Per-identifier detail attached to a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub problem_type: ProblemType,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
}

/// An ACME problem document, served as `application/problem+json`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}: {}", .problem_type.as_urn(), .detail)]
pub struct AcmeError {
    #[serde(rename = "type")]
    pub problem_type: ProblemType,
    pub detail: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Subproblem>,
}

impl AcmeError {
    pub fn new(problem_type: ProblemType, status: u16, detail: impl Into<String>) -> Self {
        Self { problem_type, detail: detail.into(), status, subproblems: Vec::new() }
    }

    pub fn with_subproblem(
        mut self,
        problem_type: ProblemType,
        detail: impl Into<String>,
        identifier: Option<Identifier>,
    ) -> Self {
        self.subproblems.push(Subproblem { problem_type, detail: detail.into(), identifier });
        self
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::Malformed, 400, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::Unauthorized, 401, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::Unauthorized, 403, detail)
    }

    pub fn account_does_not_exist(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::AccountDoesNotExist, 400, detail)
    }

    pub fn not_found(resource: &str, id: impl std::fmt::Display) -> Self {
        Self::new(ProblemType::Malformed, 404, format!("{} '{}' not found", resource, id))
    }

    pub fn bad_csr(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::BadCsr, 400, detail)
    }

    pub fn bad_public_key(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::BadPublicKey, 400, detail)
    }

    pub fn order_not_ready(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::OrderNotReady, 403, detail)
    }

    pub fn rejected_identifier(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::RejectedIdentifier, 400, detail)
    }

    pub fn bad_revocation_reason(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::BadRevocationReason, 400, detail)
    }

    pub fn already_revoked(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::AlreadyRevoked, 400, detail)
    }

    pub fn incorrect_response(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::IncorrectResponse, 403, detail)
    }

    pub fn connection(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::Connection, 400, detail)
    }

    pub fn server_internal(detail: impl Into<String>) -> Self {
        Self::new(ProblemType::ServerInternal, 500, detail)
    }
}

impl From<CertplaneError> for AcmeError {
    fn from(err: CertplaneError) -> Self {
        let (problem_type, status) = match err.kind() {
            ErrorKind::MalformedRequest => (ProblemType::Malformed, 400),
            ErrorKind::Unauthorized => (ProblemType::Unauthorized, 401),
            ErrorKind::Forbidden => (ProblemType::Unauthorized, 403),
            ErrorKind::AccountDoesNotExist => (ProblemType::AccountDoesNotExist, 400),
            ErrorKind::NotFound => (ProblemType::Malformed, 404),
            ErrorKind::AlreadyRevoked => (ProblemType::AlreadyRevoked, 400),
            ErrorKind::ReplayedToken => (ProblemType::Unauthorized, 401),
            ErrorKind::ConstraintViolation => (ProblemType::RejectedIdentifier, 403),
            ErrorKind::NotImplemented => (ProblemType::ServerInternal, 501),
            ErrorKind::InternalServerError => (ProblemType::ServerInternal, 500),
        };
        Self::new(problem_type, status, err.public_message())
    }
}
