//! # Certplane
//!
//! A certificate authority control plane. Clients obtain X.509 certificates
//! either by presenting a one-time token signed by a configured provisioner,
//! by authenticating with a certificate the authority issued earlier, or by
//! driving the ACME account/order/authorization/challenge state machine.
//!
//! ## Architecture
//!
//! ```text
//! HTTP (CRL, revoke) ──┐
//!                      ├─→ Authority ──→ AuthDb ──→ KvStore (memory | sqlite)
//! ACME service ────────┘       │
//!                              └─→ ProvisionerRegistry
//! ```
//!
//! ## Core Components
//!
//! - **Provisioner Registry**: immutable snapshots indexed by id, name, token
//!   key id and issuer
//! - **Authority**: token/mTLS authorization, signing, revocation and CRLs
//! - **AuthDb**: replay protection and revocation records over a key-value store
//! - **ACME**: resource state machine with compare-and-swap persistence

pub mod acme;
pub mod api;
pub mod authority;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod provisioner;
pub mod startup;
pub mod storage;

pub use config::AppConfig;
pub use errors::{CertplaneError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
