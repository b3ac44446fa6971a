//! Domain layer
//!
//! Identifier types shared by the ACME state machine and its storage.

pub mod id;

pub use id::{AccountId, AuthorizationId, CertificateId, ChallengeId, OrderId};
