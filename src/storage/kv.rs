//! # Key-Value Storage Contract
//!
//! The one storage abstraction the authority depends on. Everything that has
//! "check-then-set" semantics (one-time token redemption, revocation, account
//! key uniqueness, challenge and order transitions) goes through
//! [`KvStore::cmp_and_swap`], so every backend only has to get a single
//! primitive right.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::{CertplaneError, Result};

/// Bucket names used by the authority and the ACME state machine.
pub mod buckets {
    pub const USED_TOKENS: &str = "used_ott";
    pub const REVOKED_CERTS: &str = "revoked_x509_certs";
    pub const CERTS_DATA: &str = "x509_certs_data";
    pub const CRL: &str = "x509_crl";

    pub const ACME_ACCOUNTS: &str = "acme_accounts";
    pub const ACME_ACCOUNT_KEYS: &str = "acme_account_keys";
    pub const ACME_ORDERS: &str = "acme_orders";
    pub const ACME_ORDERS_BY_ACCOUNT: &str = "acme_orders_by_account";
    pub const ACME_AUTHZS: &str = "acme_authzs";
    pub const ACME_CHALLENGES: &str = "acme_challenges";
    pub const ACME_CERTS: &str = "acme_certs";
    pub const ACME_CERTS_BY_SERIAL: &str = "acme_certs_by_serial";
    pub const ACME_CERT_KEYS: &str = "acme_cert_keys";
}

/// Abstract key-value store with an atomic conditional write.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Read a value.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Unconditionally write a value.
    async fn set(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Atomically replace the value at `key` with `new` if the current value
    /// equals `old`. `old = None` means "store only if absent".
    ///
    /// Returns `true` if the write happened. A `false` return is not an error;
    /// it means another writer got there first.
    async fn cmp_and_swap(
        &self,
        bucket: &str,
        key: &str,
        old: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool>;

    /// All entries of a bucket, ordered by key.
    async fn list(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Release any resources held by the backend.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Serialize a record for storage.
pub fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CertplaneError::Serialization {
        source: e,
        context: format!("Failed to serialize {}", what),
    })
}

/// Deserialize a stored record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| CertplaneError::Serialization {
        source: e,
        context: format!("Failed to deserialize {}", what),
    })
}
