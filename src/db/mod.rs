//! # Authority Database
//!
//! The persistence contract the authority relies on for replay protection,
//! revocation and CRL state. [`KvAuthDb`] implements it over any
//! [`KvStore`](crate::storage::KvStore); [`SimpleDb`] only provides replay
//! protection.

pub mod simple;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::errors::{CertplaneError, Result};
use crate::storage::{buckets, decode, encode, KvStore};

pub use simple::SimpleDb;

/// Identity of the provisioner that authorized an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerData {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub provisioner_type: String,
}

/// A redeemed one-time token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedToken {
    pub id: String,
    pub token: String,
    pub used_at: DateTime<Utc>,
}

/// Issuance record written for every signed certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateData {
    pub serial: String,
    pub provisioner: Option<ProvisionerData>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Revocation record. Written at most once per serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedCertificateInfo {
    pub serial: String,
    pub provisioner_id: String,
    pub reason_code: u8,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub mtls: bool,
    pub acme: bool,
}

/// The most recently generated CRL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRevocationListInfo {
    pub number: u64,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub der: Vec<u8>,
}

/// Storage operations required by the authority.
#[async_trait]
pub trait AuthDb: Send + Sync + std::fmt::Debug {
    /// Atomically record a token as used. Returns `true` only for the first
    /// caller presenting `id`.
    async fn use_token(&self, id: &str, token: &str) -> Result<bool>;

    async fn is_revoked(&self, serial: &str) -> Result<bool>;

    /// Record a revocation. A second revocation of the same serial fails with
    /// `AlreadyRevoked` and leaves the first record intact.
    async fn revoke(&self, info: &RevokedCertificateInfo) -> Result<()>;

    async fn get_revoked_certificates(&self) -> Result<Vec<RevokedCertificateInfo>>;

    async fn get_crl(&self) -> Result<Option<CertificateRevocationListInfo>>;

    async fn store_crl(&self, crl: &CertificateRevocationListInfo) -> Result<()>;

    async fn store_certificate_data(&self, data: &CertificateData) -> Result<()>;

    async fn get_certificate_data(&self, serial: &str) -> Result<Option<CertificateData>>;

    async fn shutdown(&self) -> Result<()>;
}

const CRL_KEY: &str = "current";

/// [`AuthDb`] over a bucketed key-value store.
#[derive(Debug, Clone)]
pub struct KvAuthDb {
    store: Arc<dyn KvStore>,
}

impl KvAuthDb {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }
}

#[async_trait]
impl AuthDb for KvAuthDb {
    #[instrument(skip(self, token), fields(token_id = %id), name = "db_use_token")]
    async fn use_token(&self, id: &str, token: &str) -> Result<bool> {
        let record =
            UsedToken { id: id.to_string(), token: token.to_string(), used_at: Utc::now() };
        let value = encode(&record, "used token")?;
        self.store.cmp_and_swap(buckets::USED_TOKENS, id, None, &value).await
    }

    #[instrument(skip(self), fields(serial = %serial), name = "db_is_revoked")]
    async fn is_revoked(&self, serial: &str) -> Result<bool> {
        Ok(self.store.get(buckets::REVOKED_CERTS, serial).await?.is_some())
    }

    #[instrument(skip(self, info), fields(serial = %info.serial), name = "db_revoke")]
    async fn revoke(&self, info: &RevokedCertificateInfo) -> Result<()> {
        let value = encode(info, "revocation record")?;
        if self.store.cmp_and_swap(buckets::REVOKED_CERTS, &info.serial, None, &value).await? {
            Ok(())
        } else {
            Err(CertplaneError::already_revoked(&info.serial))
        }
    }

    #[instrument(skip(self), name = "db_get_revoked_certificates")]
    async fn get_revoked_certificates(&self) -> Result<Vec<RevokedCertificateInfo>> {
        self.store
            .list(buckets::REVOKED_CERTS)
            .await?
            .iter()
            .map(|(_, bytes)| decode(bytes, "revocation record"))
            .collect()
    }

    #[instrument(skip(self), name = "db_get_crl")]
    async fn get_crl(&self) -> Result<Option<CertificateRevocationListInfo>> {
        self.store
            .get(buckets::CRL, CRL_KEY)
            .await?
            .map(|bytes| decode(&bytes, "CRL"))
            .transpose()
    }

    #[instrument(skip(self, crl), fields(number = crl.number), name = "db_store_crl")]
    async fn store_crl(&self, crl: &CertificateRevocationListInfo) -> Result<()> {
        let value = encode(crl, "CRL")?;
        self.store.set(buckets::CRL, CRL_KEY, &value).await
    }

    #[instrument(skip(self, data), fields(serial = %data.serial), name = "db_store_certificate_data")]
    async fn store_certificate_data(&self, data: &CertificateData) -> Result<()> {
        let value = encode(data, "certificate data")?;
        self.store.set(buckets::CERTS_DATA, &data.serial, &value).await
    }

    #[instrument(skip(self), fields(serial = %serial), name = "db_get_certificate_data")]
    async fn get_certificate_data(&self, serial: &str) -> Result<Option<CertificateData>> {
        self.store
            .get(buckets::CERTS_DATA, serial)
            .await?
            .map(|bytes| decode(&bytes, "certificate data"))
            .transpose()
    }

    async fn shutdown(&self) -> Result<()> {
        self.store.close().await
    }
}
