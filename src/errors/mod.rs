//! # Error Handling
//!
//! Error types for the certplane authority, built on `thiserror`.

pub mod tls;
pub mod types;

pub use tls::TlsError;
pub use types::{CertplaneError, ErrorKind, Result};
